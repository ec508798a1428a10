//! Error types shared across the crate.
//!
//! Only [`DecodeError`] and [`SinkError`] are meant to reach the host; the
//! scheduler swallows [`MalformedTickError`] and treats it as a missing tick.

use thiserror::Error;

use crate::session::SessionId;

/// The PCM source can not be turned into mono frames.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unsupported sample width: {0} bits")]
    UnsupportedSampleWidth(u16),

    #[error("Unsupported sample encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("Source has no channels")]
    NoChannels,

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(f32),

    #[error("Failed to read WAV header: {0}")]
    Wav(#[from] hound::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A tick frame that does not follow the wire layout.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MalformedTickError {
    #[error("Frame of {len} bytes is shorter than the {header} byte header")]
    Truncated { len: usize, header: usize },

    #[error("Frame claims {item_count} items but only {available} bytes follow the header")]
    ItemsOverrun { item_count: usize, available: usize },

    #[error("Field {field} is negative ({value})")]
    NegativeField { field: &'static str, value: i32 },

    #[error("Item index {index} is outside sample count {sample_count}")]
    IndexOutOfRange { index: u32, sample_count: u32 },

    #[error("Tick with {items} items exceeds the {max} item frame budget")]
    Oversized { items: usize, max: usize },

    #[error("Field {field} is not a usable rate ({value})")]
    InvalidRate { field: &'static str, value: f64 },

    #[error("Tick of {sample_count} samples exceeds the {max} sample limit")]
    TooLong { sample_count: u32, max: u32 },
}

/// Audio output failed. Fatal for the owning session.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Sink is not open")]
    NotOpen,

    #[error("Receiver disconnected")]
    Disconnected,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("No session with id {0}")]
    UnknownSession(SessionId),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown track field: {0}")]
    UnknownField(String),

    #[error("Invalid value {value:?} for {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
