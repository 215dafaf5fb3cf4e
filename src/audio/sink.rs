//! Audio sink abstraction
//!
//! The mixer only needs three things from an output device: negotiate a
//! period size, accept one period of interleaved i16 at a time (blocking
//! until there is room), and shut down. Underrun recovery is the sink's
//! business; an error from `write` means recovery already failed.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::constants::{MAX_PERIOD_FRAMES, PERIODS_PER_BUFFER};
use crate::error::AudioError;

/// Requested output format. Samples are always s16 interleaved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub buffer_frames: u32,
    /// Explicit period size; derived from `buffer_frames` when `None`
    pub period_frames: Option<u32>,
}

impl SinkFormat {
    /// Period size before any device constraints are applied
    pub fn preferred_period(&self) -> u32 {
        self.period_frames
            .unwrap_or(self.buffer_frames / PERIODS_PER_BUFFER)
            .max(1)
    }

    /// Reject a negotiated period the mixer buffers cannot hold
    pub fn check_period(period: usize) -> Result<usize, AudioError> {
        if period == 0 || period >= MAX_PERIOD_FRAMES {
            return Err(AudioError::PeriodTooLarge {
                period,
                max: MAX_PERIOD_FRAMES,
            });
        }
        Ok(period)
    }

    /// Real-time duration of `frames` frames
    pub fn duration_of(&self, frames: usize) -> Duration {
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }
}

impl From<&crate::config::AudioConfig> for SinkFormat {
    fn from(config: &crate::config::AudioConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            buffer_frames: config.buffer_frames,
            period_frames: config.period_frames,
        }
    }
}

/// Output device accepting whole periods of interleaved i16 samples
pub trait AudioSink: Send {
    /// Open the device and return the negotiated period size in frames
    fn configure(&mut self, format: &SinkFormat) -> Result<usize, AudioError>;

    /// Write interleaved samples, blocking until accepted. Returns frames written.
    fn write(&mut self, samples: &[i16]) -> Result<usize, AudioError>;

    /// No period follows until the next `write`; silence from here on is
    /// expected rather than an underrun
    fn idle(&mut self) {}

    /// Drain and close the device
    fn shutdown(&mut self);

    /// Underruns observed so far
    fn underruns(&self) -> u64 {
        0
    }
}

impl<T: AudioSink + ?Sized> AudioSink for Box<T> {
    fn configure(&mut self, format: &SinkFormat) -> Result<usize, AudioError> {
        (**self).configure(format)
    }

    fn write(&mut self, samples: &[i16]) -> Result<usize, AudioError> {
        (**self).write(samples)
    }

    fn idle(&mut self) {
        (**self).idle()
    }

    fn shutdown(&mut self) {
        (**self).shutdown()
    }

    fn underruns(&self) -> u64 {
        (**self).underruns()
    }
}

fn frames_in(samples: &[i16], channels: u16) -> Result<usize, AudioError> {
    let channels = channels.max(1) as usize;
    if samples.len() % channels != 0 {
        return Err(AudioError::PartialFrame(samples.len()));
    }
    Ok(samples.len() / channels)
}

/// Sink that discards audio at real-time pace
pub struct NullSink {
    format: Option<SinkFormat>,
    next_deadline: Option<Instant>,
}

impl NullSink {
    pub fn new() -> Self {
        Self {
            format: None,
            next_deadline: None,
        }
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for NullSink {
    fn configure(&mut self, format: &SinkFormat) -> Result<usize, AudioError> {
        let period = SinkFormat::check_period(format.preferred_period() as usize)?;
        self.format = Some(*format);
        self.next_deadline = None;
        Ok(period)
    }

    fn write(&mut self, samples: &[i16]) -> Result<usize, AudioError> {
        let format = self.format.ok_or(AudioError::NotConfigured)?;
        let frames = frames_in(samples, format.channels)?;

        let now = Instant::now();
        let deadline = self.next_deadline.filter(|d| *d > now).unwrap_or(now);
        if deadline > now {
            thread::sleep(deadline - now);
        }
        self.next_deadline = Some(deadline + format.duration_of(frames));
        Ok(frames)
    }

    fn shutdown(&mut self) {
        self.format = None;
        self.next_deadline = None;
    }
}

/// Sink that records every period written; shareable for inspection
#[derive(Clone, Default)]
pub struct MemorySink {
    inner: Arc<MemorySinkInner>,
}

#[derive(Default)]
struct MemorySinkInner {
    periods: Mutex<Vec<Vec<i16>>>,
    format: Mutex<Option<SinkFormat>>,
    fail_writes: AtomicBool,
    shut_down: AtomicBool,
    idles: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All periods written so far
    pub fn periods(&self) -> Vec<Vec<i16>> {
        self.inner.periods.lock().clone()
    }

    pub fn period_count(&self) -> usize {
        self.inner.periods.lock().len()
    }

    /// Make subsequent writes fail as if the device died
    pub fn fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Times the writer announced it went idle
    pub fn idle_count(&self) -> usize {
        self.inner.idles.load(Ordering::SeqCst)
    }
}

impl AudioSink for MemorySink {
    fn configure(&mut self, format: &SinkFormat) -> Result<usize, AudioError> {
        let period = SinkFormat::check_period(format.preferred_period() as usize)?;
        *self.inner.format.lock() = Some(*format);
        Ok(period)
    }

    fn write(&mut self, samples: &[i16]) -> Result<usize, AudioError> {
        let format = (*self.inner.format.lock()).ok_or(AudioError::NotConfigured)?;
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(AudioError::Fatal("memory sink armed to fail".to_string()));
        }
        let frames = frames_in(samples, format.channels)?;
        self.inner.periods.lock().push(samples.to_vec());
        Ok(frames)
    }

    fn idle(&mut self) {
        self.inner.idles.fetch_add(1, Ordering::SeqCst);
    }

    fn shutdown(&mut self) {
        self.inner.shut_down.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(period: Option<u32>) -> SinkFormat {
        SinkFormat {
            sample_rate: 44100,
            channels: 1,
            buffer_frames: 4096,
            period_frames: period,
        }
    }

    #[test]
    fn test_preferred_period() {
        assert_eq!(format(None).preferred_period(), 512);
        assert_eq!(format(Some(300)).preferred_period(), 300);
    }

    #[test]
    fn test_period_limit() {
        assert!(SinkFormat::check_period(1023).is_ok());
        assert!(matches!(
            SinkFormat::check_period(1024),
            Err(AudioError::PeriodTooLarge { .. })
        ));
    }

    #[test]
    fn test_memory_sink_records_and_fails() {
        let mut sink = MemorySink::new();
        assert!(matches!(sink.write(&[0; 4]), Err(AudioError::NotConfigured)));

        assert_eq!(sink.configure(&format(Some(4))).unwrap(), 4);
        assert_eq!(sink.write(&[1, 2, 3, 4]).unwrap(), 4);
        assert_eq!(sink.periods(), vec![vec![1, 2, 3, 4]]);

        sink.fail_writes(true);
        assert!(sink.write(&[0; 4]).is_err());
        assert_eq!(sink.period_count(), 1);
    }

    #[test]
    fn test_null_sink_paces_writes() {
        let mut sink = NullSink::new();
        let format = SinkFormat {
            sample_rate: 1000,
            channels: 2,
            buffer_frames: 80,
            period_frames: None,
        };
        assert_eq!(sink.configure(&format).unwrap(), 10);

        let start = Instant::now();
        for _ in 0..4 {
            assert_eq!(sink.write(&[0; 20]).unwrap(), 10);
        }
        // three full periods of 10 ms must have elapsed before the fourth write returns
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(sink.write(&[0; 3]).is_err());
    }
}
