//! Bounded sample queue between a device callback and a port
//!
//! The cpal callbacks run on the audio host's thread and must never block
//! for long, so they push into / pop from this queue while the call pumps
//! wait on the other side with a timeout.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Bounded FIFO of normalized f32 samples
pub struct SampleQueue {
    samples: Mutex<VecDeque<f32>>,
    ready: Condvar,
    capacity: usize,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl SampleQueue {
    /// Create a new queue holding at most `capacity` samples
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            ready: Condvar::new(),
            capacity,
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push samples, dropping the oldest ones when full.
    /// Returns the number of samples dropped.
    pub fn push_samples<I>(&self, samples: I) -> usize
    where
        I: IntoIterator<Item = f32>,
    {
        let mut queue = self.samples.lock();
        let mut dropped = 0;
        for sample in samples {
            if queue.len() == self.capacity {
                queue.pop_front();
                dropped += 1;
            }
            queue.push_back(sample);
        }
        drop(queue);

        if dropped > 0 {
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
        }
        self.ready.notify_all();
        dropped
    }

    /// Fill `out` without blocking, padding with silence.
    /// Returns the number of real samples written.
    pub fn pop_or_silence(&self, out: &mut [f32]) -> usize {
        let mut queue = self.samples.lock();
        let available = queue.len().min(out.len());
        for (slot, sample) in out.iter_mut().zip(queue.drain(..available)) {
            *slot = sample;
        }
        drop(queue);

        if available < out.len() {
            out[available..].fill(0.0);
            self.underrun_count.fetch_add(1, Ordering::Relaxed);
        }
        available
    }

    /// Wait until `out` can be filled or `timeout` elapses, then take
    /// whatever is available. Returns the number of samples written.
    pub fn wait_pop(&self, out: &mut [f32], timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut queue = self.samples.lock();
        while queue.len() < out.len() {
            if self.ready.wait_until(&mut queue, deadline).timed_out() {
                break;
            }
        }

        let available = queue.len().min(out.len());
        for (slot, sample) in out.iter_mut().zip(queue.drain(..available)) {
            *slot = sample;
        }
        available
    }

    /// Discard all queued samples
    pub fn clear(&self) {
        self.samples.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of pushes that had to drop old samples
    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    /// Number of pops that had to pad with silence
    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }

    /// Get fill level as percentage
    pub fn fill_level(&self) -> f32 {
        self.len() as f32 / self.capacity as f32
    }
}

/// Thread-safe handle to a sample queue
pub type SharedSampleQueue = Arc<SampleQueue>;

/// Create a new shared sample queue
pub fn create_shared_queue(capacity: usize) -> SharedSampleQueue {
    Arc::new(SampleQueue::new(capacity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_overflow_drops_oldest() {
        let queue = SampleQueue::new(4);
        assert_eq!(queue.push_samples([0.1, 0.2, 0.3]), 0);
        assert_eq!(queue.push_samples([0.4, 0.5, 0.6]), 2);
        assert_eq!(queue.len(), 4);
        assert_eq!(queue.overflow_count(), 1);

        let mut out = [0.0; 4];
        assert_eq!(queue.pop_or_silence(&mut out), 4);
        assert_eq!(out, [0.3, 0.4, 0.5, 0.6]);
    }

    #[test]
    fn test_underrun_pads_with_silence() {
        let queue = SampleQueue::new(16);
        queue.push_samples([0.5, -0.5]);

        let mut out = [1.0; 4];
        assert_eq!(queue.pop_or_silence(&mut out), 2);
        assert_eq!(out, [0.5, -0.5, 0.0, 0.0]);
        assert_eq!(queue.underrun_count(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_wait_pop_times_out_with_partial_data() {
        let queue = SampleQueue::new(16);
        queue.push_samples([0.25]);

        let mut out = [0.0; 8];
        let start = Instant::now();
        assert_eq!(queue.wait_pop(&mut out, Duration::from_millis(30)), 1);
        assert!(start.elapsed() >= Duration::from_millis(25));
        assert_eq!(out[0], 0.25);
    }

    #[test]
    fn test_wait_pop_wakes_on_push() {
        let queue = create_shared_queue(64);
        let producer = queue.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            producer.push_samples(vec![0.1; 8]);
        });

        let mut out = [0.0; 8];
        assert_eq!(queue.wait_pop(&mut out, Duration::from_secs(5)), 8);
        handle.join().unwrap();
    }
}
