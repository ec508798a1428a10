//! Sample types, PCM decoding and the sine transform.
//!
//! - [`PcmSample`] - Integer PCM sample types and their normalized range
//! - [`waveform::WaveformReader`] - Decodes interleaved PCM into mono frames
//! - [`dst::TransformCache`] - Type-II/III discrete sine transforms, cached per length

pub mod dst;
pub mod sample;
pub mod waveform;

pub use dst::TransformCache;
pub use sample::PcmSample;
pub use waveform::{ByteOrder, PcmFormat, SampleEncoding, WavFileReader, WaveformReader, open_wav};
