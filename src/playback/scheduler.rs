//! Adaptive jitter buffer driving an [`AudioSink`].
//!
//! Each cycle compares the backlog against a target derived from the current
//! buffer length and the measured tick length:
//!
//! - backlog above `runaway_factor x target`: drop it all (a capacity event)
//! - backlog above target: pop everything, render, write, and repeat while
//!   more than half a target is left, then reassess the buffer length
//! - otherwise: idle
//!
//! The buffer length grows after a starved cycle, resets when the track has
//! finished, and otherwise decays back towards its default.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{TickQueue, Volume};
use crate::config::PlaybackConfig;
use crate::error::SinkError;
use crate::io::audio::{AudioSink, OutputFormat};
use crate::spectral::{SpectralDecoder, Tick};

/// Weight of the newest tick in the running tick length average.
const TICK_LENGTH_ALPHA: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Backlog below target.
    Idle,
    /// Writing rendered batches to the sink.
    Draining,
    /// Reassessing the buffer length after a drain.
    Adjusting,
    /// Backlog was dropped after growing past the runaway bound.
    Cleared,
    /// The track ended and everything queued has been played.
    Finished,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerStats {
    pub batches_written: u64,
    pub ticks_played: u64,
    pub capacity_events: u64,
    pub ticks_dropped: u64,
    pub starved_cycles: u64,
}

pub struct PlaybackScheduler<S: AudioSink> {
    queue: TickQueue,
    sink: S,
    decoder: SpectralDecoder,
    volume: Arc<Volume>,
    config: PlaybackConfig,
    buffer_length: f64,
    average_tick_length: Option<f64>,
    underruns_seen: u64,
    state: SchedulerState,
    stats: SchedulerStats,
}

impl<S: AudioSink> PlaybackScheduler<S> {
    pub fn new(queue: TickQueue, sink: S, volume: Arc<Volume>, config: PlaybackConfig) -> Self {
        Self {
            queue,
            sink,
            decoder: SpectralDecoder::with_headroom(config.headroom),
            volume,
            buffer_length: config.default_buffer_secs,
            config,
            average_tick_length: None,
            underruns_seen: 0,
            state: SchedulerState::Idle,
            stats: SchedulerStats::default(),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Current adaptive buffer length in seconds.
    pub fn buffer_length(&self) -> f64 {
        self.buffer_length
    }

    pub fn average_tick_length(&self) -> Option<f64> {
        self.average_tick_length
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Ticks the backlog should hold before a drain starts.
    pub fn target(&self) -> usize {
        match self.average_tick_length {
            Some(tick) if tick > 0.0 => ((self.buffer_length / tick).floor() as usize).max(1),
            _ => 1,
        }
    }

    pub fn output_format(&self) -> OutputFormat {
        OutputFormat::mono(self.config.output_sample_rate)
    }

    /// Open the sink and run cycles until the track finishes or `stop` is set.
    ///
    /// While `paused` is set nothing is drained and the backlog is kept.
    pub fn run(mut self, stop: &AtomicBool, paused: &AtomicBool) -> Result<SchedulerStats, SinkError> {
        self.sink.open(self.output_format())?;
        info!(
            "Playback scheduler started, buffer {:.2}s",
            self.buffer_length
        );

        let idle = Duration::from_millis(self.config.idle_interval_ms);
        let result = loop {
            if stop.load(Ordering::Acquire) {
                info!("Playback stopped");
                break Ok(());
            }
            if paused.load(Ordering::Acquire) {
                thread::sleep(idle);
                continue;
            }
            match self.cycle() {
                Ok(SchedulerState::Finished) => {
                    info!("Playback finished");
                    break Ok(());
                }
                Ok(SchedulerState::Idle) => thread::sleep(idle),
                Ok(_) => {}
                Err(e) => break Err(e),
            }
        };

        self.sink.close();
        self.decoder.clear_cache();
        result.map(|()| self.stats)
    }

    /// Run one scheduling cycle and return the state it ended in.
    pub fn cycle(&mut self) -> Result<SchedulerState, SinkError> {
        if self.average_tick_length.is_none() {
            self.average_tick_length = self.queue.front_length();
        }

        let target = self.target();
        let backlog = self.queue.len();
        let finished = self.queue.is_finished();

        if self.is_runaway(backlog, target) {
            self.clear_backlog(backlog, target);
            return Ok(self.state);
        }

        if backlog > target || (finished && backlog > 0) {
            self.state = SchedulerState::Draining;
            if !self.drain()? {
                return Ok(self.state);
            }
            self.state = SchedulerState::Adjusting;
            self.adjust();
        }

        if self.queue.is_finished() && self.queue.is_empty() {
            self.sink.drain()?;
            self.buffer_length = self.config.default_buffer_secs;
            self.state = SchedulerState::Finished;
        } else if self.state != SchedulerState::Adjusting {
            self.state = SchedulerState::Idle;
        }
        Ok(self.state)
    }

    /// Write batches until the backlog is at most half a target. Returns
    /// false when a runaway backlog was cleared instead.
    fn drain(&mut self) -> Result<bool, SinkError> {
        loop {
            let batch = self.queue.pop_all();
            if batch.is_empty() {
                return Ok(true);
            }
            self.write_batch(&batch)?;

            let target = self.target();
            let backlog = self.queue.len();
            if self.is_runaway(backlog, target) {
                self.clear_backlog(backlog, target);
                return Ok(false);
            }
            let flushing = self.queue.is_finished() && backlog > 0;
            if !flushing && backlog as f64 <= target as f64 / 2.0 {
                return Ok(true);
            }
        }
    }

    fn write_batch(&mut self, batch: &[Tick]) -> Result<(), SinkError> {
        for tick in batch {
            self.observe_tick_length(tick.length_in_seconds());
        }
        let pcm = self
            .decoder
            .render(batch, self.volume.gain(), self.config.output_sample_rate);
        debug!(
            "Writing {} ticks as {} samples (buffer {:.2}s, target {})",
            batch.len(),
            pcm.len(),
            self.buffer_length,
            self.target()
        );
        self.sink.write(&pcm)?;
        self.stats.batches_written += 1;
        self.stats.ticks_played += batch.len() as u64;
        Ok(())
    }

    fn observe_tick_length(&mut self, length: f64) {
        if !length.is_finite() || length <= 0.0 {
            return;
        }
        self.average_tick_length = Some(match self.average_tick_length {
            Some(avg) => avg + TICK_LENGTH_ALPHA * (length - avg),
            None => length,
        });
    }

    fn is_runaway(&self, backlog: usize, target: usize) -> bool {
        backlog > self.config.runaway_factor.saturating_mul(target)
    }

    fn clear_backlog(&mut self, backlog: usize, target: usize) {
        let dropped = self.queue.clear();
        warn!(
            "Backlog of {} ticks exceeds {}x target {}, dropped {} ticks",
            backlog, self.config.runaway_factor, target, dropped
        );
        self.stats.capacity_events += 1;
        self.stats.ticks_dropped += dropped as u64;
        self.state = SchedulerState::Cleared;
    }

    fn adjust(&mut self) {
        let underruns = self.sink.underruns();
        let new_underruns = underruns > self.underruns_seen;
        self.underruns_seen = underruns;

        let finished = self.queue.is_finished();
        let empty = self.queue.is_empty();
        let previous = self.buffer_length;

        if (empty && !finished) || new_underruns {
            self.stats.starved_cycles += 1;
            self.buffer_length =
                (self.buffer_length * self.config.growth_factor).min(self.config.max_buffer_secs);
            if self.buffer_length != previous {
                debug!(
                    "Starved, buffer length {:.2}s -> {:.2}s",
                    previous, self.buffer_length
                );
            }
        } else if finished && empty {
            self.buffer_length = self.config.default_buffer_secs;
        } else {
            let default = self.config.default_buffer_secs;
            self.buffer_length = default + (self.buffer_length - default) * self.config.decay_factor;
        }
    }
}
