//! PCM source decoding into mono frames.
//!
//! [`WaveformReader`] wraps any [`Read`] carrying interleaved PCM described by a
//! [`PcmFormat`] and hands out mono samples in [-1, 1], a caller-chosen number
//! of frames at a time. In preload mode the whole stream is decoded up front so
//! later reads never touch I/O.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Take};
use std::path::Path;

use bytes::Buf;
use tracing::{debug, info};

use super::PcmSample;
use crate::error::DecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    Signed,
    Unsigned,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

/// Description of an interleaved PCM byte stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PcmFormat {
    pub sample_rate: f32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub encoding: SampleEncoding,
    pub byte_order: ByteOrder,
}

impl PcmFormat {
    /// Signed 16-bit little-endian, the most common WAV layout.
    pub fn s16le(sample_rate: f32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample: 16,
            encoding: SampleEncoding::Signed,
            byte_order: ByteOrder::Little,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample as usize).div_ceil(8)
    }

    /// Bytes per interleaved frame (one sample per channel).
    pub fn frame_size(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    fn layout(&self) -> Result<SampleLayout, DecodeError> {
        if self.channels == 0 {
            return Err(DecodeError::NoChannels);
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(DecodeError::InvalidSampleRate(self.sample_rate));
        }

        let layout = match (self.encoding, self.bits_per_sample) {
            (SampleEncoding::Signed, 8) => SampleLayout::I8,
            (SampleEncoding::Signed, 16) => SampleLayout::I16,
            (SampleEncoding::Signed, 24) => SampleLayout::I24,
            (SampleEncoding::Signed, 32) => SampleLayout::I32,
            (SampleEncoding::Unsigned, 8) => SampleLayout::U8,
            (SampleEncoding::Unsigned, 16) => SampleLayout::U16,
            (SampleEncoding::Unsigned, 24) => SampleLayout::U24,
            (SampleEncoding::Unsigned, 32) => SampleLayout::U32,
            (SampleEncoding::Float, 32) => SampleLayout::F32,
            (SampleEncoding::Float, 64) => SampleLayout::F64,
            (SampleEncoding::Float, bits) => {
                return Err(DecodeError::UnsupportedEncoding(format!(
                    "{}-bit float",
                    bits
                )));
            }
            (_, bits) => return Err(DecodeError::UnsupportedSampleWidth(bits)),
        };
        Ok(layout)
    }
}

const I24_MAX: f64 = 8_388_607.0;
const U24_MID: f64 = 8_388_608.0;

#[derive(Debug, Clone, Copy)]
enum SampleLayout {
    I8,
    I16,
    I24,
    I32,
    U8,
    U16,
    U24,
    U32,
    F32,
    F64,
}

impl SampleLayout {
    fn read(self, buf: &mut &[u8], order: ByteOrder) -> f64 {
        let little = order == ByteOrder::Little;
        match self {
            SampleLayout::I8 => buf.get_i8().to_normalized(),
            SampleLayout::U8 => buf.get_u8().to_normalized(),
            SampleLayout::I16 if little => buf.get_i16_le().to_normalized(),
            SampleLayout::I16 => buf.get_i16().to_normalized(),
            SampleLayout::U16 if little => buf.get_u16_le().to_normalized(),
            SampleLayout::U16 => buf.get_u16().to_normalized(),
            SampleLayout::I24 if little => buf.get_int_le(3) as f64 / I24_MAX,
            SampleLayout::I24 => buf.get_int(3) as f64 / I24_MAX,
            SampleLayout::U24 if little => (buf.get_uint_le(3) as f64 - U24_MID) / U24_MID,
            SampleLayout::U24 => (buf.get_uint(3) as f64 - U24_MID) / U24_MID,
            SampleLayout::I32 if little => buf.get_i32_le().to_normalized(),
            SampleLayout::I32 => buf.get_i32().to_normalized(),
            SampleLayout::U32 if little => buf.get_u32_le().to_normalized(),
            SampleLayout::U32 => buf.get_u32().to_normalized(),
            SampleLayout::F32 if little => buf.get_f32_le() as f64,
            SampleLayout::F32 => buf.get_f32() as f64,
            SampleLayout::F64 if little => buf.get_f64_le(),
            SampleLayout::F64 => buf.get_f64(),
        }
    }
}

enum Source<R> {
    Streamed(R),
    Preloaded { samples: Vec<f64>, position: usize },
}

/// Decodes a PCM stream into mono samples.
pub struct WaveformReader<R> {
    format: PcmFormat,
    layout: SampleLayout,
    source: Source<R>,
    total_frames: Option<u64>,
    frames_read: u64,
    scratch: Vec<u8>,
}

impl<R: Read> WaveformReader<R> {
    /// Fails with [`DecodeError`] when the format can not be decoded. In preload
    /// mode the whole stream is read before this returns.
    pub fn new(
        mut reader: R,
        format: PcmFormat,
        preload: bool,
        total_frames: Option<u64>,
    ) -> Result<Self, DecodeError> {
        let layout = format.layout()?;
        let mut total_frames = total_frames;

        let source = if preload {
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes)?;
            let samples = mix_down(layout, &format, &bytes);
            debug!("Preloaded {} frames", samples.len());
            total_frames.get_or_insert(samples.len() as u64);
            Source::Preloaded {
                samples,
                position: 0,
            }
        } else {
            Source::Streamed(reader)
        };

        Ok(Self {
            format,
            layout,
            source,
            total_frames,
            frames_read: 0,
            scratch: Vec::new(),
        })
    }

    /// Switch a streamed reader to preload mode by decoding everything not
    /// read yet. No-op when already preloaded.
    pub fn preload(&mut self) -> Result<(), DecodeError> {
        let Source::Streamed(reader) = &mut self.source else {
            return Ok(());
        };
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let samples = mix_down(self.layout, &self.format, &bytes);
        debug!("Preloaded {} frames", samples.len());
        self.total_frames
            .get_or_insert(self.frames_read + samples.len() as u64);
        self.source = Source::Preloaded {
            samples,
            position: 0,
        };
        Ok(())
    }

    /// Read up to `frames` mono samples. Returns fewer at the end of the
    /// stream and an empty vector once it is exhausted.
    pub fn read_frames(&mut self, frames: usize) -> Result<Vec<f64>, DecodeError> {
        let out = match &mut self.source {
            Source::Preloaded { samples, position } => {
                let end = (*position + frames).min(samples.len());
                let out = samples[*position..end].to_vec();
                *position = end;
                out
            }
            Source::Streamed(reader) => {
                let wanted = frames * self.format.frame_size();
                self.scratch.resize(wanted, 0);
                let filled = read_full(reader, &mut self.scratch)?;
                let whole = filled - filled % self.format.frame_size();
                mix_down(self.layout, &self.format, &self.scratch[..whole])
            }
        };
        self.frames_read += out.len() as u64;
        Ok(out)
    }
}

impl<R: Read + Send + 'static> WaveformReader<R> {
    /// Erase the reader type so readers of different sources can be stored
    /// together.
    pub fn boxed(self) -> WaveformReader<Box<dyn Read + Send>> {
        let source = match self.source {
            Source::Streamed(reader) => Source::Streamed(Box::new(reader) as Box<dyn Read + Send>),
            Source::Preloaded { samples, position } => Source::Preloaded { samples, position },
        };
        WaveformReader {
            format: self.format,
            layout: self.layout,
            source,
            total_frames: self.total_frames,
            frames_read: self.frames_read,
            scratch: self.scratch,
        }
    }
}

impl<R> WaveformReader<R> {
    pub fn format(&self) -> &PcmFormat {
        &self.format
    }

    pub fn sample_rate(&self) -> f32 {
        self.format.sample_rate
    }

    pub fn is_preloaded(&self) -> bool {
        matches!(self.source, Source::Preloaded { .. })
    }

    pub fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Fraction of the source consumed so far, 0 when the length is unknown.
    pub fn played_fraction(&self) -> f64 {
        match self.total_frames {
            Some(total) if total > 0 => (self.frames_read as f64 / total as f64).clamp(0.0, 1.0),
            _ => 0.0,
        }
    }
}

fn mix_down(layout: SampleLayout, format: &PcmFormat, mut bytes: &[u8]) -> Vec<f64> {
    let channels = format.channels as usize;
    let frame_size = format.frame_size();
    let mut out = Vec::with_capacity(bytes.len() / frame_size);
    while bytes.len() >= frame_size {
        let mut sum = 0.0;
        for _ in 0..channels {
            sum += layout.read(&mut bytes, format.byte_order);
        }
        out.push(sum / channels as f64);
    }
    out
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Reader over the data chunk of a WAV file.
pub type WavFileReader = WaveformReader<Take<BufReader<File>>>;

/// Open a WAV file. The header is parsed by hound and the sample data is then
/// read directly from the underlying file, limited to the data chunk.
pub fn open_wav<P: AsRef<Path>>(path: P, preload: bool) -> Result<WavFileReader, DecodeError> {
    let path = path.as_ref();
    let wav = hound::WavReader::open(path)?;
    let spec = wav.spec();
    let total_frames = wav.duration() as u64;

    let encoding = match spec.sample_format {
        hound::SampleFormat::Float => SampleEncoding::Float,
        hound::SampleFormat::Int if spec.bits_per_sample == 8 => SampleEncoding::Unsigned,
        hound::SampleFormat::Int => SampleEncoding::Signed,
    };
    let format = PcmFormat {
        sample_rate: spec.sample_rate as f32,
        channels: spec.channels,
        bits_per_sample: spec.bits_per_sample,
        encoding,
        byte_order: ByteOrder::Little,
    };
    info!(
        "Opened {}: {} Hz, {} channels, {} bits, {} frames",
        path.display(),
        spec.sample_rate,
        spec.channels,
        spec.bits_per_sample,
        total_frames
    );

    let reader = wav
        .into_inner()
        .take(total_frames * format.frame_size() as u64);
    WaveformReader::new(reader, format, preload, Some(total_frames))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn s16le_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_stereo_is_averaged_to_mono() {
        let bytes = s16le_bytes(&[i16::MAX, 0, -i16::MAX, -i16::MAX]);
        let mut reader =
            WaveformReader::new(Cursor::new(bytes), PcmFormat::s16le(44100.0, 2), false, None)
                .unwrap();

        let frames = reader.read_frames(4).unwrap();
        assert_eq!(frames.len(), 2);
        assert!((frames[0] - 0.5).abs() < 1e-9);
        assert!((frames[1] + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_preload_and_stream_agree() {
        let samples: Vec<i16> = (0..1000).map(|i| (i * 31 % 2000 - 1000) as i16).collect();
        let bytes = s16le_bytes(&samples);
        let format = PcmFormat::s16le(8000.0, 1);

        let mut streamed =
            WaveformReader::new(Cursor::new(bytes.clone()), format, false, None).unwrap();
        let mut preloaded = WaveformReader::new(Cursor::new(bytes), format, true, None).unwrap();
        assert!(!streamed.is_preloaded());
        assert!(preloaded.is_preloaded());
        assert_eq!(preloaded.total_frames(), Some(1000));

        loop {
            let a = streamed.read_frames(300).unwrap();
            let b = preloaded.read_frames(300).unwrap();
            assert_eq!(a, b);
            if a.is_empty() {
                break;
            }
        }
        assert_eq!(streamed.frames_read(), 1000);
    }

    #[test]
    fn test_preload_after_partial_stream() {
        let bytes = s16le_bytes(&[0, 1000, 2000, 3000]);
        let format = PcmFormat::s16le(8000.0, 1);
        let mut reader = WaveformReader::new(Cursor::new(bytes), format, false, None).unwrap();
        let first = reader.read_frames(1).unwrap();
        reader.preload().unwrap();
        assert!(reader.is_preloaded());
        assert_eq!(reader.total_frames(), Some(4));

        let rest = reader.read_frames(10).unwrap();
        assert_eq!(first.len() + rest.len(), 4);
        assert!((rest[0] - 1000.0 / i16::MAX as f64).abs() < 1e-12);
    }

    #[test]
    fn test_short_final_read() {
        let bytes = s16le_bytes(&[1, 2, 3, 4, 5]);
        let mut reader =
            WaveformReader::new(Cursor::new(bytes), PcmFormat::s16le(8000.0, 1), false, Some(5))
                .unwrap();
        assert_eq!(reader.read_frames(3).unwrap().len(), 3);
        assert!((reader.played_fraction() - 0.6).abs() < 1e-9);
        assert_eq!(reader.read_frames(3).unwrap().len(), 2);
        assert!(reader.read_frames(3).unwrap().is_empty());
        assert_eq!(reader.played_fraction(), 1.0);
    }

    #[test]
    fn test_partial_trailing_frame_is_dropped() {
        let mut bytes = s16le_bytes(&[100, 200]);
        bytes.push(7);
        let mut reader =
            WaveformReader::new(Cursor::new(bytes), PcmFormat::s16le(8000.0, 2), false, None)
                .unwrap();
        assert_eq!(reader.read_frames(10).unwrap().len(), 1);
    }

    #[test]
    fn test_sample_layouts() {
        let cases: Vec<(SampleEncoding, u16, ByteOrder, Vec<u8>, f64)> = vec![
            (SampleEncoding::Unsigned, 8, ByteOrder::Little, vec![0], -1.0),
            (SampleEncoding::Signed, 8, ByteOrder::Little, vec![127], 1.0),
            (SampleEncoding::Signed, 16, ByteOrder::Big, vec![0x7f, 0xff], 1.0),
            (SampleEncoding::Unsigned, 16, ByteOrder::Little, vec![0x00, 0x80], 0.0),
            (SampleEncoding::Signed, 24, ByteOrder::Little, vec![0x01, 0x00, 0x80], -1.0),
            (SampleEncoding::Signed, 24, ByteOrder::Big, vec![0x7f, 0xff, 0xff], 1.0),
            (SampleEncoding::Unsigned, 24, ByteOrder::Big, vec![0x80, 0x00, 0x00], 0.0),
            (SampleEncoding::Signed, 32, ByteOrder::Little, i32::MAX.to_le_bytes().to_vec(), 1.0),
            (SampleEncoding::Float, 32, ByteOrder::Big, 0.25f32.to_be_bytes().to_vec(), 0.25),
            (SampleEncoding::Float, 64, ByteOrder::Little, (-0.5f64).to_le_bytes().to_vec(), -0.5),
        ];

        for (encoding, bits, order, bytes, expected) in cases {
            let format = PcmFormat {
                sample_rate: 8000.0,
                channels: 1,
                bits_per_sample: bits,
                encoding,
                byte_order: order,
            };
            let mut reader = WaveformReader::new(Cursor::new(bytes), format, false, None).unwrap();
            let frames = reader.read_frames(1).unwrap();
            assert_eq!(frames.len(), 1, "{:?} {}", encoding, bits);
            assert!(
                (frames[0] - expected).abs() < 1e-6,
                "{:?} {} {:?}: {} != {}",
                encoding,
                bits,
                order,
                frames[0],
                expected
            );
        }
    }

    #[test]
    fn test_unsupported_formats() {
        let mut format = PcmFormat::s16le(8000.0, 1);
        format.bits_per_sample = 12;
        assert!(matches!(
            WaveformReader::new(Cursor::new(Vec::new()), format, false, None),
            Err(DecodeError::UnsupportedSampleWidth(12))
        ));

        format.bits_per_sample = 16;
        format.encoding = SampleEncoding::Float;
        assert!(matches!(
            WaveformReader::new(Cursor::new(Vec::new()), format, false, None),
            Err(DecodeError::UnsupportedEncoding(_))
        ));

        let format = PcmFormat::s16le(8000.0, 0);
        assert!(matches!(
            WaveformReader::new(Cursor::new(Vec::new()), format, false, None),
            Err(DecodeError::NoChannels)
        ));
    }

    #[test]
    fn test_open_wav() {
        let path = std::env::temp_dir().join(format!("tickwave-waveform-{}.wav", std::process::id()));
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..100 {
            writer.write_sample(i16::MAX).unwrap();
            writer.write_sample(i16::MAX).unwrap();
        }
        writer.finalize().unwrap();

        let mut reader = open_wav(&path, false).unwrap();
        assert_eq!(reader.sample_rate(), 22050.0);
        assert_eq!(reader.total_frames(), Some(100));
        let frames = reader.read_frames(1000).unwrap();
        assert_eq!(frames.len(), 100);
        assert!(frames.iter().all(|&s| (s - 1.0).abs() < 1e-9));

        std::fs::remove_file(&path).unwrap();
    }
}
