//! Window slicing and sparsification.

use std::io::Read;

use tracing::trace;

use super::tick::{Tick, TickItem};
use crate::audio::{TransformCache, WaveformReader};
use crate::config::TrackConfig;
use crate::error::DecodeError;

/// Splits a sample stream into tick windows whose lengths average exactly
/// `sample_rate / ticks_per_second`.
///
/// Each window is `floor(sample_rate / tps)` samples long, plus one whenever
/// the carried remainder reaches a whole sample.
#[derive(Debug, Clone)]
pub struct TickClock {
    sample_rate: u64,
    ticks_per_second: u64,
    remainder: u64,
}

impl TickClock {
    /// Non-integral sample rates are rounded to the nearest whole hertz.
    pub fn new(sample_rate: f32, ticks_per_second: u32) -> Self {
        Self {
            sample_rate: sample_rate.round().max(1.0) as u64,
            ticks_per_second: ticks_per_second.max(1) as u64,
            remainder: 0,
        }
    }

    pub fn next_window_len(&mut self) -> usize {
        self.remainder += self.sample_rate;
        let len = self.remainder / self.ticks_per_second;
        self.remainder -= len * self.ticks_per_second;
        len as usize
    }

    pub fn ticks_per_second(&self) -> u32 {
        self.ticks_per_second as u32
    }

    /// Change the tick rate. The carried remainder is dropped.
    pub fn set_ticks_per_second(&mut self, ticks_per_second: u32) {
        self.ticks_per_second = ticks_per_second.max(1) as u64;
        self.remainder = 0;
    }
}

/// Turns windows of mono samples into [`Tick`]s.
pub struct SpectralEncoder {
    sample_rate: f32,
    config: TrackConfig,
    clock: TickClock,
    transforms: TransformCache,
}

impl SpectralEncoder {
    pub fn new(sample_rate: f32, config: TrackConfig) -> Self {
        Self {
            sample_rate,
            clock: TickClock::new(sample_rate, config.ticks_per_second),
            config,
            transforms: TransformCache::new(),
        }
    }

    pub fn config(&self) -> &TrackConfig {
        &self.config
    }

    /// Takes effect from the next window on.
    pub fn set_config(&mut self, config: TrackConfig) {
        if config.ticks_per_second != self.config.ticks_per_second {
            self.clock.set_ticks_per_second(config.ticks_per_second);
        }
        self.config = config;
    }

    pub fn next_window_len(&mut self) -> usize {
        self.clock.next_window_len()
    }

    /// Read the next window from `reader` and encode it. A short read at the
    /// end of the source yields a short tick; `None` once nothing is left.
    pub fn encode_next<R: Read>(
        &mut self,
        reader: &mut WaveformReader<R>,
    ) -> Result<Option<Tick>, DecodeError> {
        let len = self.next_window_len();
        let window = reader.read_frames(len)?;
        if window.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.encode_window(&window)))
    }

    /// Encode one window. Its length becomes the tick's sample count.
    pub fn encode_window(&mut self, window: &[f64]) -> Tick {
        let len = window.len();
        if len == 0 {
            return Tick::silent(0, self.sample_rate);
        }

        let mut coefficients = window.to_vec();
        self.transforms.forward(&mut coefficients);

        let half = len as f64 / 2.0;
        for c in coefficients.iter_mut() {
            *c /= half;
        }

        let items = sparsify(&coefficients, &self.config);
        trace!("Encoded {} samples into {} items", len, items.len());

        Tick {
            items,
            dst_length: len as u32,
            ticks_per_second: self.sample_rate as f64 / len as f64,
            sample_rate: self.sample_rate,
            sample_count: len as u32,
        }
    }
}

/// Keep the loudest normalized coefficients that pass both volume floors.
///
/// Zero coefficients and those quieter than the absolute floor are dropped
/// first. Of the rest, anything below `min + (max - min) * relative` is
/// dropped, where min and max are taken over those survivors. The result is
/// ordered by descending magnitude, ties in ascending index order, and cut to
/// [`TrackConfig::item_cap`].
pub fn sparsify(coefficients: &[f64], config: &TrackConfig) -> Vec<TickItem> {
    let mut items: Vec<TickItem> = coefficients
        .iter()
        .enumerate()
        .map(|(i, &c)| TickItem::new(i as u32, c as f32))
        .filter(|item| {
            let volume = item.magnitude.abs() as f64;
            volume != 0.0 && volume >= config.minimum_volume_absolute
        })
        .collect();

    if items.is_empty() {
        return items;
    }

    let (min, max) = items.iter().fold((f32::MAX, 0.0f32), |(lo, hi), item| {
        let volume = item.magnitude.abs();
        (lo.min(volume), hi.max(volume))
    });
    let floor = min as f64 + (max - min) as f64 * config.minimum_volume_relative_percent;
    items.retain(|item| item.magnitude.abs() as f64 >= floor);

    items.sort_by(|a, b| b.magnitude.abs().total_cmp(&a.magnitude.abs()));
    items.truncate(config.item_cap());
    items
}
