//! Resynthesis of PCM from ticks.

use tracing::trace;

use super::tick::{MAX_TICK_SECONDS, Tick};
use crate::audio::dst::round_trip_gain;
use crate::audio::{TransformCache, sample};

/// Fraction of the gap between two neighbouring samples each one moves at a
/// tick boundary.
pub const BOUNDARY_BLEND: f64 = 0.25;

/// Default output headroom.
pub const HEADROOM: f64 = 0.9;

/// Rebuilds time-domain audio from ticks, caching one transform context per
/// tick length.
pub struct SpectralDecoder {
    transforms: TransformCache,
    headroom: f64,
}

impl SpectralDecoder {
    pub fn new() -> Self {
        Self::with_headroom(HEADROOM)
    }

    pub fn with_headroom(headroom: f64) -> Self {
        Self {
            transforms: TransformCache::new(),
            headroom,
        }
    }

    /// Rebuild the `sample_count` samples of one tick, scaled back to the
    /// amplitude the encoder saw.
    pub fn synthesize(&mut self, tick: &Tick) -> Vec<f64> {
        let len = tick.sample_count as usize;
        let mut window = vec![0.0; len];
        if len == 0 {
            return window;
        }

        let half = len as f64 / 2.0;
        for item in &tick.items {
            if let Some(slot) = window.get_mut(item.index as usize) {
                *slot = item.magnitude as f64 * half;
            }
        }

        if !tick.is_silent() {
            self.transforms.inverse(&mut window);
            let gain = round_trip_gain(len);
            for s in window.iter_mut() {
                *s /= gain;
            }
        }
        window
    }

    /// Synthesize a run of adjacent ticks into one buffer, blending each seam.
    pub fn synthesize_batch(&mut self, ticks: &[Tick]) -> Vec<f64> {
        let total = ticks.iter().map(|t| t.sample_count as usize).sum();
        let mut out: Vec<f64> = Vec::with_capacity(total);
        for tick in ticks {
            let mut window = self.synthesize(tick);
            if let (Some(last), Some(first)) = (out.last_mut(), window.first_mut()) {
                smooth_boundary(last, first);
            }
            out.append(&mut window);
        }
        out
    }

    /// Render a batch to 16-bit PCM at `output_rate`.
    ///
    /// The output holds `round(sum of tick lengths * output_rate)` samples,
    /// scaled by `volume` and the headroom factor. Ticks without a positive
    /// finite length add nothing, and no tick counts for more than
    /// [`MAX_TICK_SECONDS`].
    pub fn render(&mut self, ticks: &[Tick], volume: f64, output_rate: u32) -> Vec<i16> {
        let samples = self.synthesize_batch(ticks);
        let seconds: f64 = ticks
            .iter()
            .filter(|t| t.sample_count > 0)
            .map(Tick::length_in_seconds)
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(|s| s.min(MAX_TICK_SECONDS))
            .sum();
        let target = (seconds * output_rate as f64).round() as usize;
        let mut resampled = resample_nearest(&samples, target);

        let gain = volume.clamp(0.0, 1.0) * self.headroom;
        for s in resampled.iter_mut() {
            *s *= gain;
        }
        trace!(
            "Rendered {} ticks into {} samples at {} Hz",
            ticks.len(),
            resampled.len(),
            output_rate
        );
        sample::quantize(&resampled)
    }

    /// Number of transform lengths currently cached.
    pub fn cached_lengths(&self) -> usize {
        self.transforms.len()
    }

    pub fn clear_cache(&mut self) {
        self.transforms.clear();
    }
}

impl Default for SpectralDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Pull the last sample of one window and the first of the next a quarter of
/// the way towards each other.
pub fn smooth_boundary(last: &mut f64, first: &mut f64) {
    let delta = (*first - *last) * BOUNDARY_BLEND;
    *last += delta;
    *first -= delta;
}

/// Stretch or shrink `input` to `target` samples by nearest-index lookup.
pub fn resample_nearest(input: &[f64], target: usize) -> Vec<f64> {
    if input.is_empty() {
        return vec![0.0; target];
    }
    if input.len() == target {
        return input.to_vec();
    }
    let ratio = input.len() as f64 / target as f64;
    (0..target)
        .map(|i| input[((i as f64 * ratio) as usize).min(input.len() - 1)])
        .collect()
}
