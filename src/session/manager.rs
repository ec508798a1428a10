//! Host-facing control surface over all running sessions.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use super::SessionId;
use super::listener::{PlaybackFeed, TickListener};
use super::track::{SessionStatus, Track, TrackSession};
use crate::config::{PlaybackConfig, TrackConfig, TrackField};
use crate::error::SessionError;
use crate::io::audio::AudioSink;
use crate::playback::Volume;

/// Owns every [`TrackSession`] by id.
///
/// Sessions are independent; a slow listener on one never stalls another.
/// All methods take `&self`, so the manager can be shared behind an `Arc`.
pub struct SessionManager {
    sessions: DashMap<SessionId, TrackSession>,
    playback: PlaybackConfig,
    volume: Arc<Volume>,
    realtime: bool,
}

impl SessionManager {
    pub fn new(playback: PlaybackConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            playback,
            volume: Arc::new(Volume::default()),
            realtime: true,
        }
    }

    /// Produce ticks as fast as listeners accept them instead of in real time.
    pub fn unpaced(mut self) -> Self {
        self.realtime = false;
        self
    }

    pub fn playback_config(&self) -> &PlaybackConfig {
        &self.playback
    }

    /// Volume applied by every feed created through [`Self::local_feed`].
    pub fn volume(&self) -> &Arc<Volume> {
        &self.volume
    }

    /// A local playback listener rendering to the sink built by `make_sink`.
    pub fn local_feed<S, F>(&self, make_sink: F) -> PlaybackFeed
    where
        S: AudioSink + 'static,
        F: FnOnce() -> S + Send + 'static,
    {
        PlaybackFeed::spawn(make_sink, self.volume.clone(), self.playback.clone())
    }

    /// Start encoding `track` for `listener`. Fails without creating a session
    /// when the source format or the track configuration is unusable.
    pub fn play(
        &self,
        track: &Track,
        listener: Box<dyn TickListener>,
    ) -> Result<SessionId, SessionError> {
        let id = SessionId::next();
        let session = TrackSession::start(id, track, listener, self.realtime)?;
        self.sessions.insert(id, session);
        Ok(id)
    }

    pub fn pause(&self, id: SessionId) -> Result<(), SessionError> {
        self.with_session(id, |s| s.pause())
    }

    pub fn resume(&self, id: SessionId) -> Result<(), SessionError> {
        self.with_session(id, |s| s.resume())
    }

    /// Stop and forget a session, returning how it ended.
    pub fn stop(&self, id: SessionId) -> Result<SessionStatus, SessionError> {
        let (_, mut session) = self
            .sessions
            .remove(&id)
            .ok_or(SessionError::UnknownSession(id))?;
        Ok(session.stop())
    }

    /// Block until a session ends on its own, then forget it.
    pub fn wait(&self, id: SessionId) -> Result<SessionStatus, SessionError> {
        let (_, mut session) = self
            .sessions
            .remove(&id)
            .ok_or(SessionError::UnknownSession(id))?;
        Ok(session.join())
    }

    pub fn played_fraction(&self, id: SessionId) -> Result<f64, SessionError> {
        self.with_session(id, |s| s.played_fraction())
    }

    pub fn status(&self, id: SessionId) -> Result<SessionStatus, SessionError> {
        self.with_session(id, |s| s.status())
    }

    pub fn config(&self, id: SessionId) -> Result<TrackConfig, SessionError> {
        self.with_session(id, |s| s.config())
    }

    pub fn reconfigure(&self, id: SessionId, config: TrackConfig) -> Result<(), SessionError> {
        self.with_session(id, |s| s.reconfigure(config))?
    }

    /// Change a single field of a running session's configuration by name.
    pub fn modify(&self, id: SessionId, field: TrackField, value: &str) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get(&id)
            .ok_or(SessionError::UnknownSession(id))?;
        let mut config = session.config();
        config.set(field, value)?;
        info!("Session {} set {} = {}", id, field.key(), value);
        session.reconfigure(config)
    }

    /// Let another listener join a running session.
    pub fn add_listener(
        &self,
        id: SessionId,
        listener: Box<dyn TickListener>,
    ) -> Result<(), SessionError> {
        self.with_session(id, |s| s.add_listener(listener))
    }

    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.iter().map(|s| *s.key()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Forget sessions that have ended, returning their final status.
    pub fn reap(&self) -> Vec<(SessionId, SessionStatus)> {
        let done: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|s| s.is_done())
            .map(|s| *s.key())
            .collect();
        done.into_iter()
            .filter_map(|id| self.sessions.remove(&id))
            .map(|(id, mut session)| (id, session.join()))
            .collect()
    }

    pub fn stop_all(&self) {
        for id in self.ids() {
            if let Some((_, mut session)) = self.sessions.remove(&id) {
                session.stop();
            }
        }
    }

    fn with_session<T>(
        &self,
        id: SessionId,
        f: impl FnOnce(&TrackSession) -> T,
    ) -> Result<T, SessionError> {
        let session = self
            .sessions
            .get(&id)
            .ok_or(SessionError::UnknownSession(id))?;
        Ok(f(&session))
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(PlaybackConfig::default())
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::audio::waveform::PcmFormat;
    use crate::error::DecodeError;
    use crate::io::audio::MemorySink;
    use crate::session::listener::{DirectMessage, direct_channel};

    fn tone(seconds: f64, sample_rate: u32, frequency: f64) -> Track {
        let frames = (seconds * sample_rate as f64) as usize;
        let data: Vec<u8> = (0..frames)
            .map(|n| {
                let t = n as f64 / sample_rate as f64;
                ((2.0 * std::f64::consts::PI * frequency * t).sin() * 10000.0) as i16
            })
            .flat_map(|s| s.to_le_bytes())
            .collect();
        Track::raw("tone", data, PcmFormat::s16le(sample_rate as f32, 1))
    }

    fn playback() -> PlaybackConfig {
        PlaybackConfig {
            output_sample_rate: 8000,
            default_buffer_secs: 2.0,
            ..PlaybackConfig::default()
        }
    }

    fn wait_for(mut done: impl FnMut() -> bool) {
        let start = Instant::now();
        while !done() && start.elapsed() < Duration::from_secs(10) {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_local_playback_end_to_end() {
        let manager = SessionManager::new(playback()).unpaced();
        let sink = MemorySink::new();
        let handle = sink.clone();
        let feed = manager.local_feed(move || sink);

        let id = manager.play(&tone(1.0, 8000, 200.0), Box::new(feed)).unwrap();
        assert_eq!(manager.wait(id).unwrap(), SessionStatus::Finished);

        let samples = handle.samples();
        assert_eq!(samples.len(), 8000);
        assert!(handle.drained());
        assert!(handle.is_closed());
        let peak = samples.iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert!(peak > 5000, "peak {peak}");
        assert!(manager.is_empty());
    }

    #[test]
    fn test_volume_scales_local_playback() {
        let manager = SessionManager::new(playback()).unpaced();
        manager.volume().set_master(0.0);
        let sink = MemorySink::new();
        let handle = sink.clone();
        let feed = manager.local_feed(move || sink);

        let id = manager.play(&tone(0.5, 8000, 200.0), Box::new(feed)).unwrap();
        manager.wait(id).unwrap();
        assert!(handle.samples().iter().all(|&s| s == 0));
    }

    #[test]
    fn test_unsupported_source_surfaces_decode_error() {
        let manager = SessionManager::default();
        let mut format = PcmFormat::s16le(8000.0, 1);
        format.channels = 0;
        let (sink, _receiver) = direct_channel();
        let result = manager.play(&Track::raw("bad", vec![0u8; 16], format), Box::new(sink));
        assert!(matches!(
            result,
            Err(SessionError::Decode(DecodeError::NoChannels))
        ));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_unknown_session() {
        let manager = SessionManager::default();
        let (sink, _receiver) = direct_channel();
        let id = manager.play(&tone(0.1, 8000, 200.0), Box::new(sink)).unwrap();
        manager.stop(id).unwrap();

        assert!(matches!(
            manager.pause(id),
            Err(SessionError::UnknownSession(other)) if other == id
        ));
        assert!(manager.played_fraction(id).is_err());
        assert!(manager.stop(id).is_err());
    }

    #[test]
    fn test_control_surface() {
        let manager = SessionManager::default();
        let (sink, receiver) = direct_channel();
        let id = manager.play(&tone(3.0, 8000, 200.0), Box::new(sink)).unwrap();
        assert_eq!(manager.ids(), vec![id]);

        wait_for(|| manager.played_fraction(id).unwrap() > 0.0);
        manager.pause(id).unwrap();
        assert_eq!(manager.status(id).unwrap(), SessionStatus::Paused);
        let fraction = manager.played_fraction(id).unwrap();
        assert!(fraction > 0.0 && fraction < 1.0, "fraction {fraction}");

        manager.resume(id).unwrap();
        assert_eq!(manager.status(id).unwrap(), SessionStatus::Playing);

        manager
            .modify(id, TrackField::MaxSoundNumber, "3")
            .unwrap();
        assert_eq!(manager.config(id).unwrap().max_sound_number, 3);
        assert!(manager.modify(id, TrackField::TicksPerSecond, "0").is_err());
        assert_eq!(manager.config(id).unwrap().ticks_per_second, 20);

        assert_eq!(manager.stop(id).unwrap(), SessionStatus::Stopped);
        assert!(manager.is_empty());
        assert!(receiver.try_iter().count() > 0);
    }

    #[test]
    fn test_added_listener_receives_later_ticks() {
        let manager = SessionManager::default();
        let (first, first_rx) = direct_channel();
        let (second, second_rx) = direct_channel();
        let id = manager.play(&tone(1.0, 8000, 200.0), Box::new(first)).unwrap();
        manager.add_listener(id, Box::new(second)).unwrap();
        assert_eq!(manager.wait(id).unwrap(), SessionStatus::Finished);

        let first: Vec<DirectMessage> = first_rx.try_iter().collect();
        let second: Vec<DirectMessage> = second_rx.try_iter().collect();
        assert_eq!(first.last(), Some(&DirectMessage::Finished));
        assert_eq!(second.last(), Some(&DirectMessage::Finished));
        assert!(second.len() <= first.len());
        assert_eq!(first[first.len() - second.len()..], second[..]);
    }

    #[test]
    fn test_reap_collects_finished_sessions() {
        let manager = SessionManager::default().unpaced();
        let (sink, _receiver) = direct_channel();
        let id = manager.play(&tone(0.2, 8000, 200.0), Box::new(sink)).unwrap();
        let mut reaped = Vec::new();
        wait_for(|| {
            reaped.extend(manager.reap());
            !reaped.is_empty()
        });
        assert_eq!(reaped, vec![(id, SessionStatus::Finished)]);
        assert!(manager.is_empty());
    }
}
