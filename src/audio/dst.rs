//! Discrete sine transforms backed by a cached complex FFT.
//!
//! Forward is the type-II DST, inverse is the type-III DST, both unnormalized:
//!
//! ```text
//! forward:  X[k] = 2 * sum_n x[n] * sin(pi * (k + 1) * (n + 1/2) / N)
//! inverse:  y[n] = (-1)^n * X[N-1] + 2 * sum_{k < N-1} X[k] * sin(pi * (k + 1) * (n + 1/2) / N)
//! ```
//!
//! so `inverse(forward(x)) == 2 * N * x`. Each length runs on one FFT of size
//! `2N` over the odd extension of the input.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use tracing::debug;

/// Gain of an inverse after a forward transform of length `len`.
pub fn round_trip_gain(len: usize) -> f64 {
    2.0 * len as f64
}

/// Precomputed FFT plans and work buffers for one transform length.
pub struct DstContext {
    len: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
    /// e^{i * pi * j / 2N} for j in 0..=N
    twiddles: Vec<Complex<f64>>,
    buffer: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
}

impl DstContext {
    fn new(planner: &mut FftPlanner<f64>, len: usize) -> Self {
        let forward = planner.plan_fft_forward(2 * len);
        let inverse = planner.plan_fft_inverse(2 * len);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());
        let twiddles = (0..=len)
            .map(|j| Complex::from_polar(1.0, PI * j as f64 / (2 * len) as f64))
            .collect();

        Self {
            len,
            forward,
            inverse,
            twiddles,
            buffer: vec![Complex::new(0.0, 0.0); 2 * len],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Type-II DST of `data`, in place. `data.len()` must equal the context length.
    pub fn forward(&mut self, data: &mut [f64]) {
        assert_eq!(data.len(), self.len, "DST input length mismatch");
        let n = self.len;

        for (i, &x) in data.iter().enumerate() {
            self.buffer[i] = Complex::new(x, 0.0);
            self.buffer[2 * n - 1 - i] = Complex::new(-x, 0.0);
        }
        self.forward
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        for (k, out) in data.iter_mut().enumerate() {
            let j = k + 1;
            *out = -(self.twiddles[j] * self.buffer[j]).im;
        }
    }

    /// Type-III DST of `data`, in place. `data.len()` must equal the context length.
    pub fn inverse(&mut self, data: &mut [f64]) {
        assert_eq!(data.len(), self.len, "DST input length mismatch");
        let n = self.len;

        self.buffer.fill(Complex::new(0.0, 0.0));
        for (k, &x) in data.iter().enumerate() {
            let j = k + 1;
            let weight = if j < n { 2.0 } else { 1.0 };
            self.buffer[j] = self.twiddles[j] * (weight * x);
        }
        self.inverse
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        for (i, out) in data.iter_mut().enumerate() {
            *out = self.buffer[i].im;
        }
    }
}

/// Transform contexts keyed by window length.
///
/// Building a context costs time proportional to its length, and tick windows
/// nearly always repeat one or two lengths, so contexts are kept until
/// [`TransformCache::clear`] or drop.
pub struct TransformCache {
    planner: FftPlanner<f64>,
    contexts: HashMap<usize, DstContext>,
}

impl TransformCache {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
            contexts: HashMap::new(),
        }
    }

    pub fn context(&mut self, len: usize) -> &mut DstContext {
        let planner = &mut self.planner;
        self.contexts.entry(len).or_insert_with(|| {
            debug!("Building DST context for length {}", len);
            DstContext::new(planner, len)
        })
    }

    pub fn forward(&mut self, data: &mut [f64]) {
        if data.is_empty() {
            return;
        }
        self.context(data.len()).forward(data);
    }

    pub fn inverse(&mut self, data: &mut [f64]) {
        if data.is_empty() {
            return;
        }
        self.context(data.len()).inverse(data);
    }

    /// Number of cached lengths.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn clear(&mut self) {
        self.contexts.clear();
    }
}

impl Default for TransformCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn naive_forward(x: &[f64]) -> Vec<f64> {
        let n = x.len();
        (0..n)
            .map(|k| {
                2.0 * x
                    .iter()
                    .enumerate()
                    .map(|(i, &v)| v * (PI * (k + 1) as f64 * (i as f64 + 0.5) / n as f64).sin())
                    .sum::<f64>()
            })
            .collect()
    }

    fn random_window(len: usize) -> Vec<f64> {
        let mut rng = rand::thread_rng();
        (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect()
    }

    #[test]
    fn test_forward_matches_definition() {
        let x = random_window(13);
        let expected = naive_forward(&x);

        let mut cache = TransformCache::new();
        let mut actual = x.clone();
        cache.forward(&mut actual);

        for (a, e) in actual.iter().zip(&expected) {
            assert!((a - e).abs() < 1e-9, "{} != {}", a, e);
        }
    }

    #[test]
    fn test_inverse_of_forward_scales_by_2n() {
        let mut cache = TransformCache::new();
        for len in [1, 2, 7, 64, 441, 2205] {
            let original = random_window(len);
            let mut data = original.clone();
            cache.forward(&mut data);
            cache.inverse(&mut data);

            let gain = round_trip_gain(len);
            for (y, x) in data.iter().zip(&original) {
                assert!(
                    (y - x * gain).abs() < 1e-8 * gain,
                    "len {}: {} != {}",
                    len,
                    y,
                    x * gain
                );
            }
        }
    }

    #[test]
    fn test_pure_bin_has_single_coefficient() {
        let n = 100;
        let bin = 9;
        let mut data: Vec<f64> = (0..n)
            .map(|i| (PI * (bin + 1) as f64 * (i as f64 + 0.5) / n as f64).sin())
            .collect();

        let mut cache = TransformCache::new();
        cache.forward(&mut data);

        for (k, &v) in data.iter().enumerate() {
            if k == bin {
                assert!((v - n as f64).abs() < 1e-9);
            } else {
                assert!(v.abs() < 1e-9, "bin {} leaked {}", k, v);
            }
        }
    }

    #[test]
    fn test_contexts_are_reused_per_length() {
        let mut cache = TransformCache::new();
        let mut a = vec![0.5; 32];
        let mut b = vec![0.25; 32];
        let mut c = vec![0.25; 33];
        cache.forward(&mut a);
        cache.forward(&mut b);
        assert_eq!(cache.len(), 1);
        cache.inverse(&mut c);
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_empty_input_is_noop() {
        let mut cache = TransformCache::new();
        let mut empty: Vec<f64> = Vec::new();
        cache.forward(&mut empty);
        cache.inverse(&mut empty);
        assert!(cache.is_empty());
    }
}
