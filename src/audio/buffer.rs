//! Lock-free period queue between the mixing engine and the output callback
//!
//! A bounded single-producer single-consumer queue of whole periods. The
//! producer side blocks (in short waits) when the queue is full, which is
//! what paces the mixer to the device clock.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Bounded queue of interleaved i16 periods
pub struct PeriodQueue {
    queue: ArrayQueue<Vec<i16>>,
    pushed: AtomicU64,
    underrun_count: AtomicU64,
    /// Set by a push, cleared when the queue runs dry or the producer
    /// goes idle. Running dry while set is an underrun.
    playing: AtomicBool,
}

impl PeriodQueue {
    /// Create a queue holding at most `capacity` periods
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            pushed: AtomicU64::new(0),
            underrun_count: AtomicU64::new(0),
            playing: AtomicBool::new(false),
        }
    }

    /// Push a period; hands it back if the queue is full
    pub fn push(&self, period: Vec<i16>) -> Result<(), Vec<i16>> {
        self.queue.push(period)?;
        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.playing.store(true, Ordering::Release);
        Ok(())
    }

    /// Pop the next period for playback. Running dry in the middle of a
    /// stream counts one underrun per dry spell.
    pub fn pop(&self) -> Option<Vec<i16>> {
        match self.queue.pop() {
            Some(period) => Some(period),
            None => {
                if self.playing.swap(false, Ordering::AcqRel) {
                    self.underrun_count.fetch_add(1, Ordering::Relaxed);
                }
                None
            }
        }
    }

    /// The producer has nothing more for now; whatever is queued plays
    /// out and the silence after it is not an underrun.
    pub fn expect_drain(&self) {
        self.playing.store(false, Ordering::Release);
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Periods accepted since creation
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> u64 {
        self.underrun_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a period queue
pub type SharedPeriodQueue = Arc<PeriodQueue>;

pub fn create_shared_queue(capacity: usize) -> SharedPeriodQueue {
    Arc::new(PeriodQueue::new(capacity))
}

/// Consumer-side cursor that feeds a device callback sample by sample
/// from whole periods, emitting silence when the queue runs dry.
pub struct PeriodReader {
    queue: SharedPeriodQueue,
    current: Vec<i16>,
    position: usize,
}

impl PeriodReader {
    pub fn new(queue: SharedPeriodQueue) -> Self {
        Self {
            queue,
            current: Vec::new(),
            position: 0,
        }
    }

    /// Fill `out` with converted samples. Returns false if an underrun
    /// forced silence into part of the buffer.
    pub fn fill<T>(&mut self, out: &mut [T], convert: impl Fn(i16) -> T, silence: T) -> bool
    where
        T: Copy,
    {
        let mut written = 0;
        while written < out.len() {
            if self.position >= self.current.len() {
                match self.queue.pop() {
                    Some(period) => {
                        self.current = period;
                        self.position = 0;
                        continue;
                    }
                    None => {
                        out[written..].fill(silence);
                        return false;
                    }
                }
            }

            let n = (self.current.len() - self.position).min(out.len() - written);
            let src = &self.current[self.position..self.position + n];
            for (dst, &sample) in out[written..written + n].iter_mut().zip(src) {
                *dst = convert(sample);
            }
            self.position += n;
            written += n;
        }
        true
    }
}

/// Convert an i16 sample to the f32 range [-1.0, 1.0)
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}
