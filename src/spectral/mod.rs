//! Spectral ticks: the sparse sine-transform representation of short windows.
//!
//! # Data
//! - [`Tick`] - Kept coefficients of one window plus its timing
//!
//! # Processing
//! - [`SpectralEncoder`] - Windows mono samples and keeps the loudest coefficients
//! - [`codec`] - Fixed big-endian frame layout for transport
//! - [`SpectralDecoder`] - Inverse transform, seam blending and 16-bit rendering

pub mod codec;
pub mod decoder;
pub mod encoder;
pub mod tick;

pub use decoder::SpectralDecoder;
pub use encoder::{SpectralEncoder, TickClock, sparsify};
pub use tick::{HEADER_SIZE, ITEM_SIZE, MAX_FRAME_SIZE, MAX_ITEMS_PER_TICK, Tick, TickItem};
