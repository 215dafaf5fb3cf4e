//! # Net Audio Mixer
//!
//! Multi-client PCM mixer served over TCP. Producers connect, push one
//! period of 16-bit audio at a time, and the server mixes every active
//! stream into a single output period for the system audio device.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────┐  ┌──────────┐        ┌──────────┐
//! │ Client 0 │  │ Client 1 │  ...   │ Client 7 │   [count|gain][period of s16le]
//! └────┬─────┘  └────┬─────┘        └────┬─────┘            ▲ 1-byte ack
//!      │             │                   │                  │
//!      ▼             ▼                   ▼                  │
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                 Connection Acceptor (network::acceptor)             │
//! │      accept() → first free slot, or close immediately when full     │
//! └──────────────────────────────┬──────────────────────────────────────┘
//!                                │ Mutex<SlotTable>
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    Mixing Engine (mixer::engine)                    │
//! │  ┌───────────────┐   ┌──────────────────┐   ┌───────────────────┐   │
//! │  │ read header + │──▶│ mix PREVIOUS set │──▶│ saturate to i16   │   │
//! │  │ payload, ack  │   │ gain × window    │   │ write one period  │   │
//! │  └───────────────┘   └──────────────────┘   └─────────┬─────────┘   │
//! │         current/previous buffer sets swap every cycle │             │
//! └───────────────────────────────────────────────────────┼─────────────┘
//!                                                         ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │            Audio Sink (audio::output, cpal output stream)           │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Playback deliberately lags one period behind reception so that the
//! last buffer of a client that vanishes mid-stream can still be faded out.

pub mod audio;
pub mod config;
pub mod error;
pub mod mixer;
pub mod network;
pub mod protocol;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Default TCP port the acceptor listens on
    pub const DEFAULT_PORT: u16 = 8888;

    /// Default number of simultaneous client slots
    pub const DEFAULT_MAX_CLIENTS: usize = 8;

    /// Default output sample rate
    pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

    /// Default channel count (mono)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Default device buffer size in frames
    pub const DEFAULT_BUFFER_FRAMES: u32 = 4096;

    /// Periods per device buffer when no explicit period size is requested
    pub const PERIODS_PER_BUFFER: u32 = 8;

    /// Upper bound (exclusive) on the negotiated period size in frames
    pub const MAX_PERIOD_FRAMES: usize = 1024;

    /// Pause between mixing cycles
    pub const DEFAULT_CYCLE_DELAY: Duration = Duration::from_millis(2);

    /// Bytes per sample on the wire and at the sink (s16le)
    pub const BYTES_PER_SAMPLE: usize = 2;
}
