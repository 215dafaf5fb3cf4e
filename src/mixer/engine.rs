//! Mixing engine
//!
//! Once per period: read one chunk from every occupied slot, acknowledge
//! it, then mix the buffers captured on the *previous* cycle and hand the
//! result to the audio sink. The one-period lag lets a buffer be re-tagged
//! as the end of its stream when the producer vanishes before sending an
//! explicit terminator, so it can still be faded out.

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::audio::sink::AudioSink;
use crate::config::EngineConfig;
use crate::constants::{BYTES_PER_SAMPLE, DEFAULT_CYCLE_DELAY};
use crate::error::AudioError;
use crate::mixer::dsp::{accumulate_interleaved, saturate_into};
use crate::mixer::slot::{MixerState, SlotTable};
use crate::network::stream::ClientStream;
use crate::protocol::{decode_samples, ChunkHeader, StreamPosition, ACK_CONTINUE, ACK_END, HEADER_SIZE};

/// Why a client lost its slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictReason {
    /// Client sent a header with a non-positive count
    EndOfStream,
    HeaderRead(io::ErrorKind),
    PayloadRead(io::ErrorKind),
    AckWrite(io::ErrorKind),
}

impl fmt::Display for EvictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictReason::EndOfStream => write!(f, "end of stream"),
            EvictReason::HeaderRead(kind) => write!(f, "header read failed ({:?})", kind),
            EvictReason::PayloadRead(kind) => write!(f, "payload read failed ({:?})", kind),
            EvictReason::AckWrite(kind) => write!(f, "ack write failed ({:?})", kind),
        }
    }
}

/// Two per-slot buffer sets whose roles swap every cycle
pub struct BufferSets {
    sets: [Vec<Vec<i16>>; 2],
    current: usize,
}

impl BufferSets {
    pub fn new(slots: usize, samples_per_period: usize) -> Self {
        let set = || vec![vec![0i16; samples_per_period]; slots];
        Self {
            sets: [set(), set()],
            current: 0,
        }
    }

    /// Buffer receiving this cycle's chunk
    pub fn current_mut(&mut self, slot: usize) -> &mut [i16] {
        &mut self.sets[self.current][slot]
    }

    /// Buffer received one cycle ago, the one that gets mixed
    pub fn previous(&self, slot: usize) -> &[i16] {
        &self.sets[1 - self.current][slot]
    }

    /// Exchange roles; no samples are copied
    pub fn swap(&mut self) {
        self.current = 1 - self.current;
    }

    /// Zero both buffers of a slot so a new client starts from silence
    pub fn clear_slot(&mut self, slot: usize) {
        for set in &mut self.sets {
            set[slot].fill(0);
        }
    }
}

/// Summary of one mixing cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Slots contributing to this cycle's mix
    pub active: usize,
    /// Slots evicted during this cycle
    pub evicted: usize,
    /// Whether a period went to the sink
    pub wrote_period: bool,
}

pub struct MixingEngine<S, K> {
    state: Arc<MixerState<S>>,
    sink: K,
    channels: usize,
    samples_per_period: usize,
    buffers: BufferSets,
    positions: Vec<StreamPosition>,
    evicted: Vec<bool>,
    payload: Vec<u8>,
    mix: Vec<i32>,
    out: Vec<i16>,
    /// Whether the previous cycle wrote a period
    was_active: bool,
    cycle_delay: Duration,
    stats_interval: Duration,
}

impl<S: ClientStream, K: AudioSink> MixingEngine<S, K> {
    /// `sink` must already be configured; `period_frames` is what it negotiated.
    pub fn new(state: Arc<MixerState<S>>, sink: K, period_frames: usize, channels: u16) -> Self {
        let slots = state.capacity();
        let channels = channels.max(1) as usize;
        let samples_per_period = period_frames * channels;

        Self {
            state,
            sink,
            channels,
            samples_per_period,
            buffers: BufferSets::new(slots, samples_per_period),
            positions: vec![StreamPosition::None; slots],
            evicted: vec![false; slots],
            payload: vec![0u8; samples_per_period * BYTES_PER_SAMPLE],
            mix: vec![0i32; samples_per_period],
            out: vec![0i16; samples_per_period],
            was_active: false,
            cycle_delay: DEFAULT_CYCLE_DELAY,
            stats_interval: Duration::from_secs(5),
        }
    }

    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.cycle_delay = config.cycle_delay();
        self.stats_interval = config.stats_interval();
        self
    }

    pub fn with_cycle_delay(mut self, delay: Duration) -> Self {
        self.cycle_delay = delay;
        self
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Run forever. Returns only when the audio sink fails for good.
    pub fn run(mut self) -> Result<(), AudioError> {
        tracing::info!(
            "Mixing engine running: {} slots, {} samples per period",
            self.positions.len(),
            self.samples_per_period
        );

        let mut last_stats = Instant::now();
        loop {
            if let Err(e) = self.run_cycle() {
                tracing::error!("Audio sink failed: {}", e);
                self.sink.shutdown();
                return Err(e);
            }

            if last_stats.elapsed() >= self.stats_interval {
                last_stats = Instant::now();
                self.log_stats();
            }
        }
    }

    /// One full cycle: collect, mix, emit, pause, swap buffers.
    pub fn run_cycle(&mut self) -> Result<CycleReport, AudioError> {
        let state = self.state.clone();
        let mut report = CycleReport::default();

        {
            let mut table = state.lock();
            report.evicted = self.collect(&mut table);
            report.active = self.mix(&table);

            for slot in 0..self.evicted.len() {
                if self.evicted[slot] {
                    table.reset(slot);
                    self.buffers.clear_slot(slot);
                }
            }
        }

        if report.active > 0 {
            saturate_into(&self.mix, &mut self.out);
            self.sink.write(&self.out)?;
            state.stats().record_period_written();
            report.wrote_period = true;
        } else if self.was_active {
            self.sink.idle();
        }
        self.was_active = report.wrote_period;
        state.stats().record_cycle();

        if !self.cycle_delay.is_zero() {
            thread::sleep(self.cycle_delay);
        }
        self.buffers.swap();

        Ok(report)
    }

    /// Per-slot receive/ack/evict pass. Returns the number of evictions.
    fn collect(&mut self, table: &mut SlotTable<S>) -> usize {
        let mut evictions = 0;

        for index in 0..self.positions.len() {
            self.positions[index] = StreamPosition::None;
            self.evicted[index] = false;

            let Some(slot) = table.get_mut(index) else {
                continue;
            };
            let Some(stream) = slot.stream_mut() else {
                continue;
            };

            let outcome = receive_chunk(
                stream,
                &mut self.payload,
                self.buffers.current_mut(index),
            );

            match outcome {
                Ok(header) => {
                    self.positions[index] = header.position();
                    slot.advance_gain(header.gain);
                }
                Err(reason) => {
                    self.positions[index] = StreamPosition::End;
                    let gain = slot.gain;
                    slot.advance_gain(gain);

                    if let Some(mut stream) = slot.evict() {
                        if reason == EvictReason::EndOfStream {
                            // Best effort: the connection is going away regardless
                            let _ = stream.write_all(&[ACK_END]);
                        }
                        stream.close();
                    }

                    if reason == EvictReason::EndOfStream {
                        tracing::info!("Slot {} ({}) finished", index, slot.peer());
                    } else {
                        tracing::info!("Slot {} ({}) evicted: {}", index, slot.peer(), reason);
                    }
                    self.state.stats().record_evicted();
                    self.evicted[index] = true;
                    evictions += 1;
                }
            }
        }

        evictions
    }

    /// Sum the lagged buffers of every active slot. Returns the active count.
    fn mix(&mut self, table: &SlotTable<S>) -> usize {
        self.mix.fill(0);
        let mut active = 0;

        for (index, &position) in self.positions.iter().enumerate() {
            if !position.is_active() {
                continue;
            }
            let gain = table.get(index).map(|s| s.prev_gain).unwrap_or(0.0);
            accumulate_interleaved(
                &mut self.mix,
                self.buffers.previous(index),
                gain,
                position,
                self.channels,
            );
            active += 1;
        }

        if active > 0 {
            tracing::debug!("Mixed {} active slot(s)", active);
        }
        active
    }

    fn log_stats(&self) {
        if let Some(line) = self.stats_line() {
            tracing::info!("{}", line);
        }
    }

    /// Stats summary, or `None` while no client is connected
    fn stats_line(&self) -> Option<String> {
        let occupied = self.state.lock().occupied();
        if occupied == 0 {
            return None;
        }
        let stats = self.state.stats().snapshot();
        Some(format!(
            "Mixer stats: {} clients, {} cycles, {} periods written, {} accepted, {} rejected, {} evicted, {} underruns",
            occupied,
            stats.cycles,
            stats.periods_written,
            stats.accepted,
            stats.rejected,
            stats.evicted,
            self.sink.underruns()
        ))
    }
}

/// Read one header + payload from a client and acknowledge it.
fn receive_chunk<S: Read + Write + ?Sized>(
    stream: &mut S,
    payload: &mut [u8],
    dst: &mut [i16],
) -> Result<ChunkHeader, EvictReason> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    stream
        .read_exact(&mut header_bytes)
        .map_err(|e| EvictReason::HeaderRead(e.kind()))?;
    let header = ChunkHeader::decode(&header_bytes)
        .map_err(|_| EvictReason::HeaderRead(io::ErrorKind::InvalidData))?;

    if header.is_end_of_stream() {
        return Err(EvictReason::EndOfStream);
    }

    stream
        .read_exact(payload)
        .map_err(|e| EvictReason::PayloadRead(e.kind()))?;
    decode_samples(payload, dst).map_err(|_| EvictReason::PayloadRead(io::ErrorKind::InvalidData))?;

    stream
        .write_all(&[ACK_CONTINUE])
        .map_err(|e| EvictReason::AckWrite(e.kind()))?;

    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::sink::{MemorySink, SinkFormat};
    use crate::network::stream::testing::{chunk, end_of_stream, ScriptedStream};

    const PERIOD: usize = 512;

    type Engine = MixingEngine<ScriptedStream, MemorySink>;

    fn engine(slots: usize) -> (Engine, Arc<MixerState<ScriptedStream>>, MemorySink) {
        let state = Arc::new(MixerState::new(slots));
        let mut sink = MemorySink::new();
        let period = sink
            .configure(&SinkFormat {
                sample_rate: 44100,
                channels: 1,
                buffer_frames: 4096,
                period_frames: Some(PERIOD as u32),
            })
            .unwrap();
        let engine = MixingEngine::new(state.clone(), sink.clone(), period, 1)
            .with_cycle_delay(Duration::ZERO);
        (engine, state, sink)
    }

    fn connect(state: &MixerState<ScriptedStream>, stream: ScriptedStream) -> usize {
        let peer = stream.peer();
        state.register(stream, peer).ok().unwrap()
    }

    #[test]
    fn test_idle_engine_writes_nothing() {
        let (mut engine, _state, sink) = engine(8);
        let report = engine.run_cycle().unwrap();
        assert_eq!(report, CycleReport::default());
        assert_eq!(sink.period_count(), 0);
    }

    #[test]
    fn test_middle_chunks_play_one_period_late() {
        let (mut engine, state, sink) = engine(8);
        let mut script = chunk(5, 1.0, &[1000; PERIOD]);
        script.extend(chunk(4, 1.0, &[2000; PERIOD]));
        let (stream, observed) = ScriptedStream::new("a", script);
        connect(&state, stream);

        engine.run_cycle().unwrap();
        engine.run_cycle().unwrap();

        let periods = sink.periods();
        assert_eq!(periods.len(), 2);
        // first cycle mixes the still-empty lagged buffer
        assert!(periods[0].iter().all(|&s| s == 0));
        // second cycle mixes chunk one at unity window, using the gain it arrived with
        assert!(periods[1].iter().all(|&s| s == 1000));
        assert_eq!(observed.lock().written, vec![ACK_CONTINUE, ACK_CONTINUE]);
    }

    #[test]
    fn test_disconnect_after_start_fades_out() {
        let (mut engine, state, sink) = engine(8);
        let (stream, observed) = ScriptedStream::new("a", chunk(1, 0.5, &[1000; PERIOD]));
        let slot = connect(&state, stream);

        let first = engine.run_cycle().unwrap();
        assert_eq!(first.active, 1);
        assert_eq!(first.evicted, 0);

        let second = engine.run_cycle().unwrap();
        assert_eq!(second.active, 1);
        assert_eq!(second.evicted, 1);

        let periods = sink.periods();
        assert!(periods[0].iter().all(|&s| s == 0));

        let end = &periods[1];
        assert_eq!(end[0], 500);
        assert_eq!(end[PERIOD - 1], 0);
        assert!(end.windows(2).all(|w| w[0] >= w[1]));

        assert!(!state.lock().get(slot).unwrap().is_occupied());
        assert!(observed.lock().closed);

        // nothing left to play
        assert!(!engine.run_cycle().unwrap().wrote_period);
        assert_eq!(state.stats().snapshot().evicted, 1);
    }

    #[test]
    fn test_two_loud_clients_saturate() {
        let (mut engine, state, sink) = engine(8);
        for name in ["a", "b"] {
            let mut script = chunk(5, 1.0, &[20000; PERIOD]);
            script.extend(chunk(4, 1.0, &[20000; PERIOD]));
            connect(&state, ScriptedStream::new(name, script).0);
        }

        engine.run_cycle().unwrap();
        let report = engine.run_cycle().unwrap();
        assert_eq!(report.active, 2);

        let periods = sink.periods();
        assert!(periods[1].iter().all(|&s| s == i16::MAX));
    }

    #[test]
    fn test_end_of_stream_header_is_acknowledged_and_closed() {
        let (mut engine, state, sink) = engine(8);
        let mut script = chunk(2, 1.0, &[300; PERIOD]);
        script.extend(end_of_stream());
        let (stream, observed) = ScriptedStream::new("a", script);
        connect(&state, stream);

        engine.run_cycle().unwrap();
        let report = engine.run_cycle().unwrap();
        assert_eq!(report.evicted, 1);

        let observed = observed.lock();
        assert_eq!(observed.written, vec![ACK_CONTINUE, ACK_END]);
        assert!(observed.closed);

        // the last real chunk is faded out rather than cut
        let end = &sink.periods()[1];
        assert_eq!(end[0], 300);
        assert_eq!(end[PERIOD - 1], 0);
        assert_eq!(state.lock().occupied(), 0);
    }

    #[test]
    fn test_zero_count_ends_stream() {
        let (mut engine, state, _sink) = engine(8);
        let (stream, observed) = ScriptedStream::new("a", chunk(0, 1.0, &[]));
        connect(&state, stream);

        let report = engine.run_cycle().unwrap();
        assert_eq!(report.evicted, 1);
        assert_eq!(observed.lock().written, vec![ACK_END]);
    }

    #[test]
    fn test_broken_ack_evicts() {
        let (mut engine, state, _sink) = engine(8);
        let stream = ScriptedStream::new("a", chunk(3, 1.0, &[1; PERIOD]))
            .0
            .with_broken_writes();
        connect(&state, stream);

        let report = engine.run_cycle().unwrap();
        assert_eq!(report.evicted, 1);
        assert_eq!(state.lock().occupied(), 0);
    }

    #[test]
    fn test_short_payload_evicts() {
        let (mut engine, state, _sink) = engine(8);
        let mut script = chunk(3, 1.0, &[1; PERIOD]);
        script.truncate(HEADER_SIZE + 100);
        let (stream, observed) = ScriptedStream::new("a", script);
        connect(&state, stream);

        let report = engine.run_cycle().unwrap();
        assert_eq!(report.evicted, 1);
        assert!(observed.lock().written.is_empty());
        assert!(observed.lock().closed);
    }

    #[test]
    fn test_reused_slot_has_no_stale_audio() {
        let (mut engine, state, sink) = engine(1);
        connect(&state, ScriptedStream::new("old", chunk(7, 2.0, &[9000; PERIOD])).0);

        engine.run_cycle().unwrap();
        engine.run_cycle().unwrap();
        assert_eq!(state.lock().occupied(), 0);

        let (stream, _) = ScriptedStream::new("new", chunk(1, 1.0, &[100; PERIOD]));
        connect(&state, stream);
        engine.run_cycle().unwrap();

        let first_of_new = sink.periods().last().cloned().unwrap();
        assert!(first_of_new.iter().all(|&s| s == 0));
        assert_eq!(state.lock().get(0).unwrap().prev_gain, 0.0);
    }

    #[test]
    fn test_client_errors_do_not_affect_others() {
        let (mut engine, state, sink) = engine(8);
        connect(&state, ScriptedStream::new("dead", Vec::new()).0);
        let mut script = chunk(2, 1.0, &[50; PERIOD]);
        script.extend(chunk(3, 1.0, &[50; PERIOD]));
        connect(&state, ScriptedStream::new("alive", script).0);

        engine.run_cycle().unwrap();
        engine.run_cycle().unwrap();

        assert_eq!(state.lock().occupied(), 1);
        assert!(sink.periods()[1].iter().all(|&s| s == 50));
    }

    #[test]
    fn test_sink_failure_is_fatal() {
        let (mut engine, state, sink) = engine(8);
        connect(&state, ScriptedStream::new("a", chunk(2, 1.0, &[1; PERIOD])).0);
        sink.fail_writes(true);
        assert!(engine.run_cycle().is_err());
    }

    #[test]
    fn test_run_shuts_sink_down_on_failure() {
        let (engine, state, sink) = engine(8);
        connect(&state, ScriptedStream::new("a", chunk(2, 1.0, &[1; PERIOD])).0);
        sink.fail_writes(true);

        assert!(matches!(engine.run(), Err(AudioError::Fatal(_))));
        assert!(sink.is_shut_down());
        assert_eq!(sink.period_count(), 0);
    }

    #[test]
    fn test_stats_only_while_clients_connected() {
        let (mut engine, state, _sink) = engine(8);
        assert_eq!(engine.stats_line(), None);

        let (stream, _observed) = ScriptedStream::new("a", chunk(1, 1.0, &[1; PERIOD]));
        connect(&state, stream);
        engine.run_cycle().unwrap();
        let line = engine.stats_line().unwrap();
        assert!(line.contains("1 clients"));
        assert!(line.contains("1 accepted"));

        // client drops out; the server goes quiet again
        engine.run_cycle().unwrap();
        engine.run_cycle().unwrap();
        assert_eq!(state.stats().snapshot().accepted, 1);
        assert_eq!(engine.stats_line(), None);
    }

    #[test]
    fn test_sink_told_when_output_stops() {
        let (mut engine, state, sink) = engine(8);
        engine.run_cycle().unwrap();
        assert_eq!(sink.idle_count(), 0);

        connect(&state, ScriptedStream::new("a", chunk(1, 1.0, &[1; PERIOD])).0);
        assert!(engine.run_cycle().unwrap().wrote_period);
        assert!(engine.run_cycle().unwrap().wrote_period);
        assert_eq!(sink.idle_count(), 0);

        assert!(!engine.run_cycle().unwrap().wrote_period);
        assert!(!engine.run_cycle().unwrap().wrote_period);
        assert_eq!(sink.idle_count(), 1);
    }

    #[test]
    fn test_buffer_sets_swap_without_copy() {
        let mut buffers = BufferSets::new(2, 4);
        buffers.current_mut(1).copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(buffers.previous(1), &[0, 0, 0, 0]);
        buffers.swap();
        assert_eq!(buffers.previous(1), &[1, 2, 3, 4]);
        buffers.clear_slot(1);
        assert_eq!(buffers.previous(1), &[0, 0, 0, 0]);
    }
}
