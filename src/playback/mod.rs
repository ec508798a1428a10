//! Paced delivery of decoded ticks to an audio sink.
//!
//! - [`TickQueue`] - Bounded backlog shared by a producer and the scheduler
//! - [`Volume`] - Host master and category volume
//! - [`PlaybackScheduler`] - Adaptive jitter buffer that drains the backlog into a sink

pub mod queue;
pub mod scheduler;
pub mod volume;

pub use queue::TickQueue;
pub use scheduler::{PlaybackScheduler, SchedulerState, SchedulerStats};
pub use volume::Volume;
