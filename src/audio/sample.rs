//! Conversions between integer PCM samples and normalized `f64`.

use num_traits::{Bounded, FromPrimitive, ToPrimitive};

/// An integer PCM sample with a linear mapping onto [-1, 1].
pub trait PcmSample: Copy + Bounded + ToPrimitive + FromPrimitive {
    /// Raw value of silence.
    const MIDPOINT: f64;
    /// Distance from the midpoint to full scale.
    const SCALE: f64;

    fn to_normalized(self) -> f64 {
        (self.to_f64().unwrap_or(Self::MIDPOINT) - Self::MIDPOINT) / Self::SCALE
    }

    /// Clip to [-1, 1] and truncate towards the midpoint. NaN maps to silence.
    fn from_normalized(value: f64) -> Self {
        let value = if value.is_nan() { 0.0 } else { value.clamp(-1.0, 1.0) };
        let top = Self::max_value().to_f64().unwrap_or(f64::MAX);
        let raw = (value * Self::SCALE + Self::MIDPOINT).min(top);
        Self::from_f64(raw).unwrap_or_else(Self::max_value)
    }
}

macro_rules! signed_pcm {
    ($($t:ty),*) => {$(
        impl PcmSample for $t {
            const MIDPOINT: f64 = 0.0;
            const SCALE: f64 = <$t>::MAX as f64;
        }
    )*};
}

macro_rules! unsigned_pcm {
    ($($t:ty),*) => {$(
        impl PcmSample for $t {
            const MIDPOINT: f64 = (<$t>::MAX as f64 + 1.0) / 2.0;
            const SCALE: f64 = Self::MIDPOINT;
        }
    )*};
}

signed_pcm!(i8, i16, i32);
unsigned_pcm!(u8, u16, u32);

/// Quantize normalized samples, clipping anything outside [-1, 1].
pub fn quantize<S: PcmSample>(samples: &[f64]) -> Vec<S> {
    samples.iter().map(|&s| S::from_normalized(s)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsigned_midpoint_is_silence() {
        assert_eq!(128u8.to_normalized(), 0.0);
        assert_eq!(32768u16.to_normalized(), 0.0);
        assert_eq!((1u32 << 31).to_normalized(), 0.0);
        assert_eq!(u8::from_normalized(0.0), 128);
    }

    #[test]
    fn test_full_scale() {
        assert_eq!(i16::MAX.to_normalized(), 1.0);
        assert_eq!(i8::MAX.to_normalized(), 1.0);
        assert_eq!(i32::MAX.to_normalized(), 1.0);
        assert_eq!(u8::MIN.to_normalized(), -1.0);
        assert_eq!(i16::from_normalized(1.0), i16::MAX);
        assert_eq!(u8::from_normalized(1.0), u8::MAX);
        assert_eq!(u16::from_normalized(-1.0), 0);
    }

    #[test]
    fn test_quantize_clips() {
        let out: Vec<i16> = quantize(&[2.0, -3.0, 0.5, f64::NAN]);
        assert_eq!(
            out,
            vec![i16::MAX, -i16::MAX, (0.5 * i16::MAX as f64) as i16, 0]
        );
    }
}
