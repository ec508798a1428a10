//! Audio sinks.
//!
//! Provides:
//! - [`AudioSink`], the blocking output contract the scheduler writes to
//! - [`DeviceSink`] for speaker playback via cpal
//! - [`MemorySink`] that records everything written to it
//! - [`NullSink`] that discards audio

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleFormat, Stream, StreamConfig};
use dasp_sample::FromSample;
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::{debug, error, info, warn};

use crate::error::SinkError;

/// Layout of the PCM handed to [`AudioSink::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl OutputFormat {
    pub fn mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
        }
    }
}

/// Blocking audio output.
///
/// `write` returns once the sink has accepted every sample, `drain` once
/// everything written has been played. Neither is called from a control
/// thread.
pub trait AudioSink {
    fn open(&mut self, format: OutputFormat) -> Result<(), SinkError>;

    fn write(&mut self, samples: &[i16]) -> Result<(), SinkError>;

    fn drain(&mut self) -> Result<(), SinkError>;

    /// Stop output and discard anything not yet played.
    fn close(&mut self);

    /// Let blocking `write` and `drain` calls give up once `stop` is set.
    fn set_stop_signal(&mut self, _stop: Arc<AtomicBool>) {}

    /// Running count of times the output ran dry while audio was expected.
    fn underruns(&self) -> u64 {
        0
    }
}

impl<S: AudioSink + ?Sized> AudioSink for Box<S> {
    fn open(&mut self, format: OutputFormat) -> Result<(), SinkError> {
        (**self).open(format)
    }

    fn write(&mut self, samples: &[i16]) -> Result<(), SinkError> {
        (**self).write(samples)
    }

    fn drain(&mut self) -> Result<(), SinkError> {
        (**self).drain()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn set_stop_signal(&mut self, stop: Arc<AtomicBool>) {
        (**self).set_stop_signal(stop)
    }

    fn underruns(&self) -> u64 {
        (**self).underruns()
    }
}

fn get_output_device(name: Option<&str>) -> Result<Device, SinkError> {
    let host = cpal::default_host();
    match name {
        Some(name) => {
            let devices = host
                .output_devices()
                .map_err(|e| SinkError::Device(format!("Failed to enumerate output devices: {e}")))?;
            devices
                .into_iter()
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| SinkError::Device(format!("Output device not found: {name}")))
        }
        None => host
            .default_output_device()
            .ok_or_else(|| SinkError::Device("No default output device available".to_string())),
    }
}

/// Names of the available output devices.
pub fn output_device_names() -> Result<Vec<String>, SinkError> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| SinkError::Device(format!("Failed to enumerate output devices: {e}")))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Default sample rate of an output device.
pub fn default_output_sample_rate(device: Option<&str>) -> Result<u32, SinkError> {
    let device = get_output_device(device)?;
    let config = device
        .default_output_config()
        .map_err(|e| SinkError::Device(format!("Failed to get default output config: {e}")))?;
    Ok(config.sample_rate().0)
}

/// State shared with the cpal callbacks.
struct Shared {
    /// Set while written audio has not been fully played.
    expecting: AtomicBool,
    underruns: AtomicU64,
    failure: Mutex<Option<String>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            expecting: AtomicBool::new(false),
            underruns: AtomicU64::new(0),
            failure: Mutex::new(None),
        }
    }

    /// Surface an error reported by the cpal error callback.
    fn check_failure(&self) -> Result<(), SinkError> {
        match self.failure.lock().unwrap().take() {
            Some(message) => Err(SinkError::Device(message)),
            None => Ok(()),
        }
    }
}

/// Copy `samples` into the ring, sleeping one `period` whenever it is full.
///
/// Returns how many samples were queued, which is fewer than requested only
/// when `stop` was set while waiting for room.
fn push_blocking(
    producer: &mut Producer<i16>,
    samples: &[i16],
    period: Duration,
    shared: &Shared,
    stop: Option<&AtomicBool>,
) -> Result<usize, SinkError> {
    let mut remaining = samples;
    while !remaining.is_empty() {
        let n = producer.slots().min(remaining.len());
        if n == 0 {
            if is_stopped(stop) {
                break;
            }
            thread::sleep(period.max(Duration::from_millis(1)));
            shared.check_failure()?;
            continue;
        }
        let chunk = producer
            .write_chunk_uninit(n)
            .map_err(|e| SinkError::Device(format!("Failed to queue samples: {e}")))?;
        chunk.fill_from_iter(remaining[..n].iter().copied());
        remaining = &remaining[n..];
    }
    Ok(samples.len() - remaining.len())
}

/// Sleep until the consumer has taken everything queued. Returns `false`
/// when `stop` cut the wait short.
fn wait_until_empty(
    producer: &Producer<i16>,
    capacity: usize,
    period: Duration,
    shared: &Shared,
    stop: Option<&AtomicBool>,
) -> Result<bool, SinkError> {
    while producer.slots() < capacity {
        if is_stopped(stop) {
            return Ok(false);
        }
        thread::sleep(period.max(Duration::from_millis(1)));
        shared.check_failure()?;
    }
    Ok(true)
}

fn is_stopped(stop: Option<&AtomicBool>) -> bool {
    stop.is_some_and(|s| s.load(Ordering::Acquire))
}

struct OpenStream {
    _stream: Stream,
    producer: Producer<i16>,
    capacity: usize,
    /// Time one device callback covers, used to let the last one finish.
    period: Duration,
}

/// Plays mono PCM on an output device.
///
/// Samples pass through a ring buffer of `buffer_secs` to the cpal callback,
/// which copies each one to every device channel. `write` blocks while the
/// ring is full, unless the stop signal is raised. The cpal stream is not
/// `Send`, so build this on the thread that will drive it.
pub struct DeviceSink {
    device_name: Option<String>,
    buffer_secs: f64,
    shared: Arc<Shared>,
    stream: Option<OpenStream>,
    stop: Option<Arc<AtomicBool>>,
}

impl DeviceSink {
    pub fn new(device_name: Option<String>, buffer_secs: f64) -> Self {
        Self {
            device_name,
            buffer_secs,
            shared: Arc::new(Shared::new()),
            stream: None,
            stop: None,
        }
    }

    fn build_stream<T>(
        device: &Device,
        config: &StreamConfig,
        mut consumer: Consumer<i16>,
        shared: Arc<Shared>,
    ) -> Result<Stream, SinkError>
    where
        T: cpal::SizedSample + FromSample<i16>,
    {
        let channels = config.channels as usize;
        let error_shared = shared.clone();

        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let mut short = false;
                    for frame in data.chunks_mut(channels) {
                        let sample = match consumer.pop() {
                            Ok(s) => s,
                            Err(_) => {
                                short = true;
                                0
                            }
                        };
                        let value = T::from_sample(sample);
                        for slot in frame.iter_mut() {
                            *slot = value;
                        }
                    }
                    if short && shared.expecting.load(Ordering::Acquire) {
                        shared.underruns.fetch_add(1, Ordering::Relaxed);
                    }
                },
                move |err| {
                    error!("An error occurred on the output audio stream: {}", err);
                    *error_shared.failure.lock().unwrap() = Some(err.to_string());
                },
                None,
            )
            .map_err(|e| SinkError::Device(format!("Failed to build output stream: {e}")))
    }
}

impl AudioSink for DeviceSink {
    fn open(&mut self, format: OutputFormat) -> Result<(), SinkError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let device = get_output_device(self.device_name.as_deref())?;
        info!(
            "Using output device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );
        let default_config = device
            .default_output_config()
            .map_err(|e| SinkError::Device(format!("Failed to get default output config: {e}")))?;
        debug!("Output config: {default_config:#?}");

        let buffer_size = match default_config.buffer_size() {
            cpal::SupportedBufferSize::Range { min, max } => {
                let target = 1024u32;
                let size = target.clamp(*min, *max);
                debug!("Using output buffer size: {} (min={}, max={})", size, min, max);
                BufferSize::Fixed(size)
            }
            cpal::SupportedBufferSize::Unknown => {
                warn!("Supported buffer size range unknown, using default");
                BufferSize::Default
            }
        };
        let period_frames = match buffer_size {
            BufferSize::Fixed(size) => size,
            BufferSize::Default => 1024,
        };
        let config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size,
        };

        let capacity = ((format.sample_rate as f64 * self.buffer_secs) as usize).max(1);
        let (producer, consumer) = RingBuffer::<i16>::new(capacity);
        let shared = self.shared.clone();

        let stream = match default_config.sample_format() {
            SampleFormat::I16 => Self::build_stream::<i16>(&device, &config, consumer, shared)?,
            SampleFormat::U16 => Self::build_stream::<u16>(&device, &config, consumer, shared)?,
            SampleFormat::F32 => Self::build_stream::<f32>(&device, &config, consumer, shared)?,
            other => {
                return Err(SinkError::Device(format!(
                    "Unsupported sample format: {other:?}"
                )));
            }
        };
        stream
            .play()
            .map_err(|e| SinkError::Device(format!("Failed to play stream: {e}")))?;
        info!(
            "Audio output started at {} Hz, {} channels",
            format.sample_rate, config.channels
        );

        self.stream = Some(OpenStream {
            _stream: stream,
            producer,
            capacity,
            period: Duration::from_secs_f64(period_frames as f64 / format.sample_rate as f64),
        });
        Ok(())
    }

    fn write(&mut self, samples: &[i16]) -> Result<(), SinkError> {
        let shared = &self.shared;
        shared.check_failure()?;
        let open = self.stream.as_mut().ok_or(SinkError::NotOpen)?;
        shared.expecting.store(true, Ordering::Release);

        let stop = self.stop.as_deref();
        let queued = push_blocking(&mut open.producer, samples, open.period, shared, stop)?;
        if queued < samples.len() {
            debug!("Stopped with {} samples unqueued", samples.len() - queued);
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<(), SinkError> {
        let shared = &self.shared;
        shared.check_failure()?;
        let open = self.stream.as_ref().ok_or(SinkError::NotOpen)?;
        let stop = self.stop.as_deref();
        if wait_until_empty(&open.producer, open.capacity, open.period, shared, stop)? {
            thread::sleep(open.period);
        }
        shared.expecting.store(false, Ordering::Release);
        Ok(())
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            self.shared.expecting.store(false, Ordering::Release);
            info!("Audio output closed");
        }
    }

    fn set_stop_signal(&mut self, stop: Arc<AtomicBool>) {
        self.stop = Some(stop);
    }

    fn underruns(&self) -> u64 {
        self.shared.underruns.load(Ordering::Relaxed)
    }
}

impl Drop for DeviceSink {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    format: Option<OutputFormat>,
    samples: Vec<i16>,
    drained: bool,
    closed: bool,
}

/// Keeps everything written to it. Clones share the recording.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<i16> {
        self.state.lock().unwrap().samples.clone()
    }

    pub fn format(&self) -> Option<OutputFormat> {
        self.state.lock().unwrap().format
    }

    pub fn drained(&self) -> bool {
        self.state.lock().unwrap().drained
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

impl AudioSink for MemorySink {
    fn open(&mut self, format: OutputFormat) -> Result<(), SinkError> {
        let mut state = self.state.lock().unwrap();
        state.format = Some(format);
        state.closed = false;
        Ok(())
    }

    fn write(&mut self, samples: &[i16]) -> Result<(), SinkError> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(SinkError::NotOpen);
        }
        state.samples.extend_from_slice(samples);
        state.drained = false;
        Ok(())
    }

    fn drain(&mut self) -> Result<(), SinkError> {
        self.state.lock().unwrap().drained = true;
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().unwrap().closed = true;
    }
}

/// Discards audio without blocking.
#[derive(Debug, Default)]
pub struct NullSink {
    written: u64,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Samples accepted so far.
    pub fn written(&self) -> u64 {
        self.written
    }
}

impl AudioSink for NullSink {
    fn open(&mut self, _format: OutputFormat) -> Result<(), SinkError> {
        Ok(())
    }

    fn write(&mut self, samples: &[i16]) -> Result<(), SinkError> {
        self.written += samples.len() as u64;
        Ok(())
    }

    fn drain(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    fn close(&mut self) {}
}
