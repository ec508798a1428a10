//! Consumers of encoded tick frames.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, Sender};
use tracing::{error, warn};

use crate::config::PlaybackConfig;
use crate::error::SinkError;
use crate::io::audio::AudioSink;
use crate::playback::{PlaybackScheduler, SchedulerStats, TickQueue, Volume};
use crate::spectral::codec;

const WAIT_POLL: Duration = Duration::from_millis(10);

/// Receives every encoded frame of a track, in production order.
///
/// A listener returning an error from `deliver` is closed and dropped from
/// its session.
pub trait TickListener: Send {
    fn deliver(&mut self, frame: &[u8]) -> Result<(), SinkError>;

    /// No more frames will follow.
    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Block until everything delivered has been consumed, or `stop` is set.
    fn wait(&mut self, _stop: &AtomicBool) -> Result<(), SinkError> {
        Ok(())
    }

    fn set_paused(&mut self, _paused: bool) {}

    /// Stop at once, discarding anything not yet consumed.
    fn close(&mut self) {}
}

impl<L: TickListener + ?Sized> TickListener for Box<L> {
    fn deliver(&mut self, frame: &[u8]) -> Result<(), SinkError> {
        (**self).deliver(frame)
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        (**self).finish()
    }

    fn wait(&mut self, stop: &AtomicBool) -> Result<(), SinkError> {
        (**self).wait(stop)
    }

    fn set_paused(&mut self, paused: bool) {
        (**self).set_paused(paused)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Local playback: decodes frames into a [`TickQueue`] drained by a
/// [`PlaybackScheduler`] on its own thread.
///
/// Malformed frames are logged, counted and skipped.
pub struct PlaybackFeed {
    queue: TickQueue,
    stop: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    worker: Option<JoinHandle<Result<SchedulerStats, SinkError>>>,
    stats: Option<SchedulerStats>,
    malformed: u64,
}

impl PlaybackFeed {
    /// Start a scheduler thread. The sink is built on that thread by
    /// `make_sink`, so it does not need to be `Send`. Closing the feed raises
    /// the sink's stop signal, so a write blocked on a full device returns.
    pub fn spawn<S, F>(make_sink: F, volume: Arc<Volume>, config: PlaybackConfig) -> Self
    where
        S: AudioSink + 'static,
        F: FnOnce() -> S + Send + 'static,
    {
        let queue = TickQueue::new(config.max_backlog);
        let stop = Arc::new(AtomicBool::new(false));
        let paused = Arc::new(AtomicBool::new(false));

        let worker = {
            let queue = queue.clone();
            let stop = stop.clone();
            let paused = paused.clone();
            thread::spawn(move || {
                let mut sink = make_sink();
                sink.set_stop_signal(stop.clone());
                let scheduler = PlaybackScheduler::new(queue, sink, volume, config);
                let result = scheduler.run(&stop, &paused);
                if let Err(e) = &result {
                    error!("Playback failed: {}", e);
                }
                result
            })
        };

        Self {
            queue,
            stop,
            paused,
            worker: Some(worker),
            stats: None,
            malformed: 0,
        }
    }

    pub fn queue(&self) -> &TickQueue {
        &self.queue
    }

    /// Frames rejected by the codec so far.
    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    /// Scheduler statistics, available once playback has ended.
    pub fn stats(&self) -> Option<&SchedulerStats> {
        self.stats.as_ref()
    }

    fn join(&mut self) -> Result<(), SinkError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        match worker.join() {
            Ok(Ok(stats)) => {
                self.stats = Some(stats);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SinkError::Device("Playback thread panicked".to_string())),
        }
    }
}

impl TickListener for PlaybackFeed {
    fn deliver(&mut self, frame: &[u8]) -> Result<(), SinkError> {
        if self.worker.as_ref().is_none_or(|w| w.is_finished()) {
            self.join()?;
            return Err(SinkError::Disconnected);
        }
        match codec::decode(frame) {
            Ok(tick) => self.queue.push(tick),
            Err(e) => {
                self.malformed += 1;
                warn!("Dropping malformed frame: {}", e);
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.queue.finish();
        Ok(())
    }

    fn wait(&mut self, stop: &AtomicBool) -> Result<(), SinkError> {
        while let Some(worker) = &self.worker {
            if worker.is_finished() {
                break;
            }
            if stop.load(Ordering::Acquire) {
                self.stop.store(true, Ordering::Release);
            }
            thread::sleep(WAIT_POLL);
        }
        self.join()
    }

    fn set_paused(&mut self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Err(e) = self.join() {
            warn!("Playback ended with error: {}", e);
        }
    }
}

impl Drop for PlaybackFeed {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DirectMessage {
    Frame(Bytes),
    Finished,
}

/// Forwards frames over a channel to a remote decoder. Never blocks.
pub struct DirectSink {
    sender: Sender<DirectMessage>,
}

/// A direct sink and the receiving end a remote decoder reads from.
pub fn direct_channel() -> (DirectSink, Receiver<DirectMessage>) {
    let (sender, receiver) = channel::unbounded();
    (DirectSink { sender }, receiver)
}

impl TickListener for DirectSink {
    fn deliver(&mut self, frame: &[u8]) -> Result<(), SinkError> {
        self.sender
            .send(DirectMessage::Frame(Bytes::copy_from_slice(frame)))
            .map_err(|_| SinkError::Disconnected)
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.sender
            .send(DirectMessage::Finished)
            .map_err(|_| SinkError::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::io::audio::{MemorySink, OutputFormat};
    use crate::spectral::{Tick, TickItem};

    /// Accepts nothing, like a device whose buffer never drains, until the
    /// stop signal is raised.
    struct StalledSink {
        stop: Option<Arc<AtomicBool>>,
        closed: Arc<AtomicBool>,
    }

    impl AudioSink for StalledSink {
        fn open(&mut self, _format: OutputFormat) -> Result<(), SinkError> {
            Ok(())
        }

        fn write(&mut self, _samples: &[i16]) -> Result<(), SinkError> {
            let stop = self.stop.clone().ok_or(SinkError::NotOpen)?;
            while !stop.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        }

        fn drain(&mut self) -> Result<(), SinkError> {
            Ok(())
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::Release);
        }

        fn set_stop_signal(&mut self, stop: Arc<AtomicBool>) {
            self.stop = Some(stop);
        }
    }

    fn frame() -> Bytes {
        let tick = Tick {
            items: vec![TickItem::new(1, 0.5)],
            dst_length: 400,
            ticks_per_second: 20.0,
            sample_rate: 8000.0,
            sample_count: 400,
        };
        codec::encode(&tick).unwrap()
    }

    fn config() -> PlaybackConfig {
        PlaybackConfig {
            output_sample_rate: 8000,
            ..PlaybackConfig::default()
        }
    }

    #[test]
    fn test_feed_plays_delivered_frames() {
        let sink = MemorySink::new();
        let handle = sink.clone();
        let mut feed = PlaybackFeed::spawn(move || sink, Arc::new(Volume::default()), config());

        for _ in 0..10 {
            feed.deliver(&frame()).unwrap();
        }
        feed.finish().unwrap();
        feed.wait(&AtomicBool::new(false)).unwrap();

        assert_eq!(handle.samples().len(), 10 * 400);
        assert!(handle.drained());
        assert_eq!(feed.stats().unwrap().ticks_played, 10);
    }

    #[test]
    fn test_feed_skips_malformed_frames() {
        let sink = MemorySink::new();
        let handle = sink.clone();
        let mut feed = PlaybackFeed::spawn(move || sink, Arc::new(Volume::default()), config());

        let mut bad = frame().to_vec();
        bad[20..24].copy_from_slice(&5i32.to_be_bytes());
        feed.deliver(&frame()).unwrap();
        feed.deliver(&bad).unwrap();
        feed.deliver(&bad[..10]).unwrap();
        feed.deliver(&frame()).unwrap();
        assert_eq!(feed.malformed(), 2);

        feed.finish().unwrap();
        feed.wait(&AtomicBool::new(false)).unwrap();
        assert_eq!(handle.samples().len(), 2 * 400);
    }

    #[test]
    fn test_feed_survives_frames_with_unusable_rates() {
        let sink = MemorySink::new();
        let handle = sink.clone();
        let mut feed = PlaybackFeed::spawn(move || sink, Arc::new(Volume::default()), config());

        let mut zero_rate = frame().to_vec();
        zero_rate[4..12].copy_from_slice(&0.0f64.to_be_bytes());
        let mut huge = frame().to_vec();
        huge[16..20].copy_from_slice(&i32::MAX.to_be_bytes());

        feed.deliver(&frame()).unwrap();
        feed.deliver(&zero_rate).unwrap();
        feed.deliver(&huge).unwrap();
        feed.deliver(&frame()).unwrap();
        assert_eq!(feed.malformed(), 2);

        feed.finish().unwrap();
        feed.wait(&AtomicBool::new(false)).unwrap();
        assert_eq!(handle.samples().len(), 2 * 400);
        assert_eq!(feed.stats().unwrap().ticks_played, 2);
    }

    #[test]
    fn test_feed_close_stops_scheduler() {
        let sink = MemorySink::new();
        let handle = sink.clone();
        let mut feed = PlaybackFeed::spawn(move || sink, Arc::new(Volume::default()), config());
        feed.deliver(&frame()).unwrap();
        feed.close();
        assert!(handle.is_closed());
        assert!(matches!(
            feed.deliver(&frame()),
            Err(SinkError::Disconnected)
        ));
    }

    #[test]
    fn test_close_interrupts_blocked_write() {
        let closed = Arc::new(AtomicBool::new(false));
        let sink = StalledSink {
            stop: None,
            closed: closed.clone(),
        };
        let mut feed = PlaybackFeed::spawn(move || sink, Arc::new(Volume::default()), config());
        feed.set_paused(true);
        for _ in 0..30 {
            feed.deliver(&frame()).unwrap();
        }
        feed.set_paused(false);
        while !feed.queue().is_empty() {
            thread::sleep(Duration::from_millis(1));
        }

        let started = Instant::now();
        feed.close();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(closed.load(Ordering::Acquire));
    }

    #[test]
    fn test_direct_sink_forwards_in_order() {
        let (mut sink, receiver) = direct_channel();
        sink.deliver(&[1]).unwrap();
        sink.deliver(&[2]).unwrap();
        sink.finish().unwrap();

        let messages: Vec<DirectMessage> = receiver.try_iter().collect();
        assert_eq!(
            messages,
            vec![
                DirectMessage::Frame(Bytes::from_static(&[1])),
                DirectMessage::Frame(Bytes::from_static(&[2])),
                DirectMessage::Finished,
            ]
        );

        drop(receiver);
        assert!(matches!(sink.deliver(&[3]), Err(SinkError::Disconnected)));
    }
}
