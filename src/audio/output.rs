//! cpal-backed audio sink
//!
//! The cpal stream lives on its own thread (streams are not `Send` on every
//! host); the sink talks to it through a bounded [`PeriodQueue`]. A blocking
//! `write` waits for queue space, so the device clock paces the mixer.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::buffer::{create_shared_queue, i16_to_f32, PeriodReader, SharedPeriodQueue};
use crate::audio::device::{get_output_device, negotiate_period};
use crate::audio::sink::{AudioSink, SinkFormat};
use crate::error::AudioError;

/// How long `configure` waits for the output thread to report the stream
const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Minimum time a write may wait for queue space before recovery kicks in
const MIN_STALL_LIMIT: Duration = Duration::from_millis(500);

/// Audio sink writing to a cpal output device
pub struct CpalSink {
    /// Device name; host default when `None`
    device_name: Option<String>,

    format: Option<SinkFormat>,

    /// Negotiated period size in frames
    period_frames: usize,

    /// Periods waiting for the output callback
    queue: Option<SharedPeriodQueue>,

    /// Whether the output thread should keep its stream alive
    running: Arc<AtomicBool>,

    thread_handle: Option<JoinHandle<()>>,

    /// Errors reported by the cpal error callback
    error_rx: Option<Receiver<AudioError>>,

    /// Successful stream rebuilds
    recoveries: u64,
}

impl CpalSink {
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            format: None,
            period_frames: 0,
            queue: None,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            error_rx: None,
            recoveries: 0,
        }
    }

    /// Spawn the output thread and wait until its stream is playing
    fn start_stream(&mut self) -> Result<(), AudioError> {
        let format = self.format.ok_or(AudioError::NotConfigured)?;
        let queue = self.queue.clone().ok_or(AudioError::NotConfigured)?;

        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        self.error_rx = Some(error_rx);

        let running = Arc::new(AtomicBool::new(true));
        self.running = running.clone();

        let device_name = self.device_name.clone();
        let period_frames = self.period_frames as u32;

        let handle = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let device = match get_output_device(device_name.as_deref()) {
                    Ok(device) => device,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let mut config = StreamConfig {
                    channels: format.channels,
                    sample_rate: cpal::SampleRate(format.sample_rate),
                    buffer_size: cpal::BufferSize::Fixed(period_frames),
                };

                let build = |config: &StreamConfig| {
                    let mut reader = PeriodReader::new(queue.clone());
                    let error_tx = error_tx.clone();
                    device.build_output_stream(
                        config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            reader.fill(data, i16_to_f32, 0.0);
                        },
                        move |err| {
                            let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                        },
                        None,
                    )
                };

                let stream = match build(&config) {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::debug!("Fixed buffer of {} frames refused ({}), using device default", period_frames, e);
                        config.buffer_size = cpal::BufferSize::Default;
                        match build(&config) {
                            Ok(stream) => stream,
                            Err(e) => {
                                let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                                return;
                            }
                        }
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep thread alive while running
                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }

                // Stream is dropped here, stopping playback
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);

        match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.stop_stream();
                Err(e)
            }
            Err(_) => {
                self.stop_stream();
                Err(AudioError::StreamError(
                    "output thread did not start in time".to_string(),
                ))
            }
        }
    }

    fn stop_stream(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        self.error_rx = None;
    }

    /// Pending stream error, or a dead output thread
    fn stream_fault(&self) -> Option<AudioError> {
        if let Some(err) = self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok()) {
            return Some(err);
        }
        match &self.thread_handle {
            Some(handle) if handle.is_finished() => {
                Some(AudioError::StreamError("output thread exited".to_string()))
            }
            None => Some(AudioError::StreamError("no output stream".to_string())),
            _ => None,
        }
    }

    /// One attempt to rebuild the stream; failure is fatal
    fn recover(&mut self, cause: &AudioError) -> Result<(), AudioError> {
        tracing::warn!("Audio output fault ({}), restarting stream", cause);
        self.stop_stream();
        self.start_stream()
            .map_err(|e| AudioError::Fatal(format!("{} (after: {})", e, cause)))?;
        self.recoveries += 1;
        tracing::info!("Audio output restarted ({} recoveries so far)", self.recoveries);
        Ok(())
    }

    fn stall_limit(&self, format: &SinkFormat) -> Duration {
        (format.duration_of(format.buffer_frames as usize) * 4).max(MIN_STALL_LIMIT)
    }
}

impl AudioSink for CpalSink {
    fn configure(&mut self, format: &SinkFormat) -> Result<usize, AudioError> {
        self.stop_stream();

        let device = get_output_device(self.device_name.as_deref())?;
        let period = SinkFormat::check_period(negotiate_period(&device, format)? as usize)?;
        drop(device);

        let capacity = (format.buffer_frames as usize / period).max(2);
        self.format = Some(*format);
        self.period_frames = period;
        self.queue = Some(create_shared_queue(capacity));

        self.start_stream()?;

        tracing::info!(
            "Audio output: {} Hz, {} channel(s), period {} frames, {} periods queued",
            format.sample_rate,
            format.channels,
            period,
            capacity
        );
        Ok(period)
    }

    fn write(&mut self, samples: &[i16]) -> Result<usize, AudioError> {
        let format = self.format.ok_or(AudioError::NotConfigured)?;
        let channels = format.channels.max(1) as usize;
        if samples.len() % channels != 0 {
            return Err(AudioError::PartialFrame(samples.len()));
        }
        let frames = samples.len() / channels;

        let mut recovered = false;
        if let Some(fault) = self.stream_fault() {
            self.recover(&fault)?;
            recovered = true;
        }

        let queue = self.queue.clone().ok_or(AudioError::NotConfigured)?;
        let wait_step = (format.duration_of(self.period_frames) / 4).max(Duration::from_millis(1));
        let stall_limit = self.stall_limit(&format);

        let mut period = samples.to_vec();
        let mut started = Instant::now();
        loop {
            match queue.push(period) {
                Ok(()) => return Ok(frames),
                Err(rejected) => period = rejected,
            }

            if started.elapsed() >= stall_limit {
                let stalled = AudioError::WriteStalled(started.elapsed().as_millis() as u64);
                if recovered {
                    return Err(AudioError::Fatal(stalled.to_string()));
                }
                self.recover(&stalled)?;
                recovered = true;
                started = Instant::now();
                continue;
            }

            thread::sleep(wait_step);
        }
    }

    fn idle(&mut self) {
        if let Some(queue) = &self.queue {
            queue.expect_drain();
        }
    }

    fn shutdown(&mut self) {
        if let (Some(queue), Some(format)) = (&self.queue, self.format) {
            let deadline = Instant::now()
                + format.duration_of(format.buffer_frames as usize)
                + Duration::from_millis(100);
            while !queue.is_empty() && Instant::now() < deadline && self.stream_fault().is_none() {
                thread::sleep(Duration::from_millis(5));
            }
        }
        self.stop_stream();
        self.format = None;
    }

    fn underruns(&self) -> u64 {
        self.queue.as_ref().map(|q| q.underrun_count()).unwrap_or(0)
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.stop_stream();
    }
}
