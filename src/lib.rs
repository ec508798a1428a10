//! Spectral tick streaming.
//!
//! Audio is cut into fixed-rate ticks, each transformed with a type-II DST and
//! reduced to its loudest coefficients. Ticks travel as compact binary frames
//! and are resynthesized, smoothed and played through an adaptive jitter
//! buffer on the receiving side.
//!
//! - [`audio`] - PCM decoding, sample conversion, DST transforms
//! - [`spectral`] - Tick model, wire codec, encoder and decoder
//! - [`playback`] - Backlog queue, volume and the playback scheduler
//! - [`io`] - Audio sinks and UDP transport
//! - [`session`] - Per-track workers and the host control surface

pub mod audio;
pub mod config;
pub mod error;
pub mod io;
pub mod playback;
pub mod session;
pub mod spectral;

pub use config::{PlaybackConfig, TrackConfig, TrackField};
pub use error::{ConfigError, DecodeError, MalformedTickError, SessionError, SinkError};
pub use session::{SessionId, SessionManager, SessionStatus, Track};
