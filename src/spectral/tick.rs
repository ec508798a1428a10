/// Largest encoded tick frame, in bytes.
pub const MAX_FRAME_SIZE: usize = 32766;

/// dstLength, ticksPerSecond, sampleRate, sampleCount, itemCount.
pub const HEADER_SIZE: usize = 4 + 8 + 4 + 4 + 4;

/// index, magnitude.
pub const ITEM_SIZE: usize = 4 + 4;

/// Items that fit in one frame.
pub const MAX_ITEMS_PER_TICK: usize = (MAX_FRAME_SIZE - HEADER_SIZE) / ITEM_SIZE;

/// Longest interval a single tick may cover.
pub const MAX_TICK_SECONDS: f64 = 10.0;

/// Largest `sample_count` accepted from the wire.
pub const MAX_TICK_SAMPLES: u32 = 1 << 20;

/// One kept transform coefficient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickItem {
    pub index: u32,
    /// Coefficient divided by half the window length, roughly within [-1, 1].
    pub magnitude: f32,
}

impl TickItem {
    pub fn new(index: u32, magnitude: f32) -> Self {
        Self { index, magnitude }
    }
}

/// Sparse spectrum of one playback interval.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    /// Items in descending `|magnitude|` order.
    pub items: Vec<TickItem>,
    pub dst_length: u32,
    pub ticks_per_second: f64,
    pub sample_rate: f32,
    pub sample_count: u32,
}

impl Tick {
    /// A tick with no items.
    pub fn silent(sample_count: u32, sample_rate: f32) -> Self {
        Self {
            items: Vec::new(),
            dst_length: sample_count,
            ticks_per_second: sample_rate as f64 / sample_count.max(1) as f64,
            sample_rate,
            sample_count,
        }
    }

    pub fn length_in_seconds(&self) -> f64 {
        1.0 / self.ticks_per_second
    }

    pub fn is_silent(&self) -> bool {
        self.items.is_empty()
    }

    /// Size of this tick on the wire.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.items.len() * ITEM_SIZE
    }

    /// Frequency in Hz of the sine basis function at `index`.
    ///
    /// Bin `k` completes `(k + 1) / 2` periods per window.
    pub fn bin_frequency(&self, index: u32) -> f64 {
        (index as f64 + 1.0) / 2.0 * self.ticks_per_second
    }

    /// The item with the largest magnitude, if any.
    pub fn dominant(&self) -> Option<&TickItem> {
        self.items.first()
    }
}
