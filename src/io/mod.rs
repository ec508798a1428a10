//! Hardware and network I/O.
//!
//! - [`AudioSink`] / [`DeviceSink`] - Blocking audio output, speaker playback via cpal
//! - [`DatagramSender`] / [`DatagramReceiver`] - UDP transport for encoded tick frames

pub mod audio;
pub mod network;

pub use audio::{AudioSink, DeviceSink, MemorySink, NullSink, OutputFormat};
pub use network::{DEFAULT_PORT, DatagramReceiver, DatagramSender};
