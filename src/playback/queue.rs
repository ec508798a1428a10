//! Backlog of decoded ticks between one producer and one scheduler.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::spectral::Tick;

struct Inner {
    ticks: Mutex<VecDeque<Tick>>,
    capacity: usize,
    finished: AtomicBool,
    overflowed: AtomicU64,
}

/// A bounded FIFO of ticks. Cloning shares the same queue.
///
/// When full, the oldest tick is dropped to make room.
#[derive(Clone)]
pub struct TickQueue {
    inner: Arc<Inner>,
}

impl TickQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                ticks: Mutex::new(VecDeque::new()),
                capacity: capacity.max(1),
                finished: AtomicBool::new(false),
                overflowed: AtomicU64::new(0),
            }),
        }
    }

    pub fn push(&self, tick: Tick) {
        let mut ticks = self.inner.ticks.lock().unwrap();
        if ticks.len() >= self.inner.capacity {
            ticks.pop_front();
            let total = self.inner.overflowed.fetch_add(1, Ordering::Relaxed) + 1;
            if total == 1 || total % 100 == 0 {
                warn!(
                    "Tick queue full at {} ticks, dropped oldest ({} so far)",
                    self.inner.capacity, total
                );
            }
        }
        ticks.push_back(tick);
    }

    /// Take every queued tick in arrival order.
    pub fn pop_all(&self) -> Vec<Tick> {
        self.inner.ticks.lock().unwrap().drain(..).collect()
    }

    /// Drop every queued tick, returning how many there were.
    pub fn clear(&self) -> usize {
        let mut ticks = self.inner.ticks.lock().unwrap();
        let len = ticks.len();
        ticks.clear();
        len
    }

    pub fn len(&self) -> usize {
        self.inner.ticks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Length in seconds of the oldest queued tick.
    pub fn front_length(&self) -> Option<f64> {
        self.inner
            .ticks
            .lock()
            .unwrap()
            .front()
            .map(Tick::length_in_seconds)
    }

    /// Mark that no more ticks will be pushed.
    pub fn finish(&self) {
        self.inner.finished.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::Acquire)
    }

    /// Ticks dropped because the queue was full.
    pub fn overflowed(&self) -> u64 {
        self.inner.overflowed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let queue = TickQueue::new(16);
        for n in 1..=3 {
            queue.push(Tick::silent(n, 8000.0));
        }
        assert_eq!(queue.len(), 3);
        let counts: Vec<u32> = queue.pop_all().iter().map(|t| t.sample_count).collect();
        assert_eq!(counts, vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let queue = TickQueue::new(2);
        for n in 1..=3 {
            queue.push(Tick::silent(n, 8000.0));
        }
        assert_eq!(queue.overflowed(), 1);
        let counts: Vec<u32> = queue.pop_all().iter().map(|t| t.sample_count).collect();
        assert_eq!(counts, vec![2, 3]);
    }

    #[test]
    fn test_clones_share_state() {
        let producer = TickQueue::new(8);
        let consumer = producer.clone();
        producer.push(Tick::silent(400, 8000.0));
        assert_eq!(consumer.front_length(), Some(0.05));
        producer.finish();
        assert!(consumer.is_finished());
        assert_eq!(consumer.clear(), 1);
    }
}
