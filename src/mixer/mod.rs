//! Slot table, mixing DSP and the real-time mixing engine

pub mod dsp;
pub mod engine;
pub mod slot;
pub mod stats;

pub use engine::{CycleReport, EvictReason, MixingEngine};
pub use slot::{MixerState, SlotTable};
pub use stats::{MixerStats, StatsSnapshot};
