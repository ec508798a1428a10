//! Tracks and the worker that turns one into a stream of encoded frames.

use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes};
use tracing::{debug, error, info, warn};

use super::SessionId;
use super::listener::TickListener;
use crate::audio::waveform::{PcmFormat, WaveformReader, open_wav};
use crate::config::TrackConfig;
use crate::error::{DecodeError, SessionError};
use crate::spectral::{SpectralEncoder, codec};

const PAUSE_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub enum TrackSource {
    Wav(PathBuf),
    /// Headerless PCM in memory.
    Raw { data: Bytes, format: PcmFormat },
}

#[derive(Debug, Clone)]
pub struct Track {
    pub name: String,
    pub source: TrackSource,
    pub config: TrackConfig,
}

impl Track {
    pub fn wav(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: path.display().to_string(),
            source: TrackSource::Wav(path),
            config: TrackConfig::default(),
        }
    }

    pub fn raw(name: impl Into<String>, data: impl Into<Bytes>, format: PcmFormat) -> Self {
        Self {
            name: name.into(),
            source: TrackSource::Raw {
                data: data.into(),
                format,
            },
            config: TrackConfig::default(),
        }
    }

    pub fn with_config(mut self, config: TrackConfig) -> Self {
        self.config = config;
        self
    }

    /// Open a streamed reader over the source. Only headers are read here;
    /// an undecodable format fails before any sample is touched.
    pub fn open(&self) -> Result<WaveformReader<Box<dyn Read + Send>>, DecodeError> {
        match &self.source {
            TrackSource::Wav(path) => Ok(open_wav(path, false)?.boxed()),
            TrackSource::Raw { data, format } => {
                let total = data.len().checked_div(format.frame_size());
                let reader = WaveformReader::new(
                    data.clone().reader(),
                    *format,
                    false,
                    total.map(|frames| frames as u64),
                )?;
                Ok(reader.boxed())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    Playing,
    Paused,
    /// Every tick was produced and every listener played it out.
    Finished,
    Stopped,
    Failed(String),
}

impl SessionStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Playing | SessionStatus::Paused)
    }
}

type Listeners = Arc<Mutex<Vec<Box<dyn TickListener>>>>;

/// State shared between a [`TrackSession`] handle and its worker.
struct Control {
    stop: AtomicBool,
    paused: AtomicBool,
    frames_read: AtomicU64,
    /// 0 while unknown.
    total_frames: AtomicU64,
    ticks_sent: AtomicU64,
    status: Mutex<SessionStatus>,
    config: Mutex<TrackConfig>,
    pending_config: Mutex<Option<TrackConfig>>,
}

impl Control {
    fn set_status(&self, status: SessionStatus) {
        *self.status.lock().unwrap() = status;
    }
}

/// Encodes one track on its own thread and fans the frames out to its
/// listeners.
///
/// Production is paced to real time unless disabled, so listeners receive
/// ticks at the rate they play.
pub struct TrackSession {
    id: SessionId,
    name: String,
    control: Arc<Control>,
    listeners: Listeners,
    worker: Option<JoinHandle<()>>,
}

impl TrackSession {
    /// Open the track and start producing. Fails without spawning anything
    /// when the configuration is invalid or the source can not be decoded.
    pub fn start(
        id: SessionId,
        track: &Track,
        listener: Box<dyn TickListener>,
        realtime: bool,
    ) -> Result<Self, SessionError> {
        track.config.validate()?;
        let reader = track.open()?;
        let encoder = SpectralEncoder::new(reader.sample_rate(), track.config.clone());

        let control = Arc::new(Control {
            stop: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            frames_read: AtomicU64::new(0),
            total_frames: AtomicU64::new(reader.total_frames().unwrap_or(0)),
            ticks_sent: AtomicU64::new(0),
            status: Mutex::new(SessionStatus::Playing),
            config: Mutex::new(track.config.clone()),
            pending_config: Mutex::new(None),
        });
        let listeners: Listeners = Arc::new(Mutex::new(vec![listener]));

        info!("Session {} playing {}", id, track.name);
        let worker = {
            let producer = Producer {
                id,
                control: control.clone(),
                listeners: listeners.clone(),
                realtime,
            };
            let preload = track.config.preload;
            thread::spawn(move || producer.run(reader, encoder, preload))
        };

        Ok(Self {
            id,
            name: track.name.clone(),
            control,
            listeners,
            worker: Some(worker),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> SessionStatus {
        self.control.status.lock().unwrap().clone()
    }

    pub fn config(&self) -> TrackConfig {
        self.control.config.lock().unwrap().clone()
    }

    pub fn pause(&self) {
        let mut status = self.control.status.lock().unwrap();
        if *status == SessionStatus::Playing {
            self.control.paused.store(true, Ordering::Release);
            *status = SessionStatus::Paused;
        }
    }

    pub fn resume(&self) {
        let mut status = self.control.status.lock().unwrap();
        if *status == SessionStatus::Paused {
            self.control.paused.store(false, Ordering::Release);
            *status = SessionStatus::Playing;
        }
    }

    /// Fraction of the source encoded so far, in `[0, 1]`.
    pub fn played_fraction(&self) -> f64 {
        let total = self.control.total_frames.load(Ordering::Acquire);
        if total == 0 {
            return 0.0;
        }
        let read = self.control.frames_read.load(Ordering::Acquire);
        (read as f64 / total as f64).clamp(0.0, 1.0)
    }

    pub fn ticks_sent(&self) -> u64 {
        self.control.ticks_sent.load(Ordering::Acquire)
    }

    /// Applied from the next tick on.
    pub fn reconfigure(&self, config: TrackConfig) -> Result<(), SessionError> {
        config.validate()?;
        *self.control.config.lock().unwrap() = config.clone();
        *self.control.pending_config.lock().unwrap() = Some(config);
        Ok(())
    }

    /// Attach another listener. It receives frames from the next tick on.
    pub fn add_listener(&self, listener: Box<dyn TickListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    pub fn is_done(&self) -> bool {
        self.worker.as_ref().is_none_or(|w| w.is_finished())
    }

    /// Stop production and every listener, discarding unplayed audio.
    pub fn stop(&mut self) -> SessionStatus {
        self.control.stop.store(true, Ordering::Release);
        self.control.paused.store(false, Ordering::Release);
        self.join()
    }

    /// Block until the worker exits on its own.
    pub fn join(&mut self) -> SessionStatus {
        let panicked = self.worker.take().is_some_and(|w| w.join().is_err());
        if panicked {
            error!("Session {} worker panicked", self.id);
            self.control
                .set_status(SessionStatus::Failed("worker panicked".to_string()));
        }
        self.status()
    }
}

impl Drop for TrackSession {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop();
        }
    }
}

struct Producer {
    id: SessionId,
    control: Arc<Control>,
    listeners: Listeners,
    realtime: bool,
}

impl Producer {
    fn run(
        self,
        mut reader: WaveformReader<Box<dyn Read + Send>>,
        mut encoder: SpectralEncoder,
        preload: bool,
    ) {
        if preload {
            if let Err(e) = reader.preload() {
                self.fail(e.to_string());
                return;
            }
            if let Some(total) = reader.total_frames() {
                self.control.total_frames.store(total, Ordering::Release);
            }
        }

        let mut deadline = Instant::now();
        let mut paused = false;
        loop {
            if self.control.stop.load(Ordering::Acquire) {
                self.close_all();
                self.control.set_status(SessionStatus::Stopped);
                info!("Session {} stopped", self.id);
                return;
            }

            if self.control.paused.load(Ordering::Acquire) {
                if !paused {
                    paused = true;
                    self.for_each_listener(|l| l.set_paused(true));
                    debug!("Session {} paused", self.id);
                }
                thread::sleep(PAUSE_POLL);
                continue;
            }
            if paused {
                paused = false;
                deadline = Instant::now();
                self.for_each_listener(|l| l.set_paused(false));
                debug!("Session {} resumed", self.id);
            }

            if let Some(config) = self.control.pending_config.lock().unwrap().take() {
                info!(
                    "Session {} reconfigured: {} ticks/s, {} items",
                    self.id,
                    config.ticks_per_second,
                    config.item_cap()
                );
                encoder.set_config(config);
            }

            let tick = match encoder.encode_next(&mut reader) {
                Ok(Some(tick)) => tick,
                Ok(None) => break,
                Err(e) => {
                    self.fail(e.to_string());
                    return;
                }
            };
            self.control
                .frames_read
                .store(reader.frames_read(), Ordering::Release);

            let frame = match codec::encode(&tick) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Session {} skipped a tick: {}", self.id, e);
                    continue;
                }
            };
            if self.deliver(&frame) == 0 {
                warn!("Session {} has no listeners left", self.id);
                self.control.set_status(SessionStatus::Stopped);
                return;
            }
            self.control.ticks_sent.fetch_add(1, Ordering::AcqRel);

            if self.realtime {
                deadline += Duration::from_secs_f64(tick.length_in_seconds());
                let now = Instant::now();
                if deadline > now {
                    thread::sleep(deadline - now);
                }
            }
        }

        self.finish();
    }

    /// Send `frame` to every listener, dropping the ones that fail. Returns
    /// how many remain.
    fn deliver(&self, frame: &[u8]) -> usize {
        let mut listeners = self.listeners.lock().unwrap();
        listeners.retain_mut(|listener| match listener.deliver(frame) {
            Ok(()) => true,
            Err(e) => {
                warn!("Session {} dropped a listener: {}", self.id, e);
                listener.close();
                false
            }
        });
        listeners.len()
    }

    /// Signal the end of the track and wait for every listener to play out.
    fn finish(&self) {
        info!(
            "Session {} produced {} ticks, waiting for playback",
            self.id,
            self.control.ticks_sent.load(Ordering::Acquire)
        );
        let mut listeners = std::mem::take(&mut *self.listeners.lock().unwrap());

        let mut failure = None;
        for listener in listeners.iter_mut() {
            let result = listener
                .finish()
                .and_then(|()| listener.wait(&self.control.stop));
            if let Err(e) = result {
                error!("Session {} listener failed: {}", self.id, e);
                failure.get_or_insert(e.to_string());
            }
        }

        let status = if self.control.stop.load(Ordering::Acquire) {
            SessionStatus::Stopped
        } else if let Some(message) = failure {
            SessionStatus::Failed(message)
        } else {
            SessionStatus::Finished
        };
        info!("Session {} ended: {:?}", self.id, status);
        self.control.set_status(status);
    }

    fn fail(&self, message: String) {
        error!("Session {} failed: {}", self.id, message);
        self.close_all();
        self.control.set_status(SessionStatus::Failed(message));
    }

    fn close_all(&self) {
        self.for_each_listener(|l| l.close());
    }

    fn for_each_listener(&self, mut f: impl FnMut(&mut Box<dyn TickListener>)) {
        for listener in self.listeners.lock().unwrap().iter_mut() {
            f(listener);
        }
    }
}
