//! Playback sessions: one producer per track feeding any number of listeners.
//!
//! - [`SessionManager`] - Host control surface (play, pause, resume, stop, progress)
//! - [`TrackSession`] - Worker that encodes a track tick by tick in real time
//! - [`TickListener`] - Receiver of encoded frames: local playback, direct channel, UDP

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub mod listener;
pub mod manager;
pub mod track;

pub use listener::{DirectMessage, DirectSink, PlaybackFeed, TickListener, direct_channel};
pub use manager::SessionManager;
pub use track::{SessionStatus, Track, TrackSession, TrackSource};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
