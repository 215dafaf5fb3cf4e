//! Audio output subsystem

pub mod buffer;
pub mod device;
pub mod output;
pub mod sink;

pub use buffer::PeriodQueue;
pub use device::{get_output_device, list_output_devices, OutputDeviceInfo};
pub use output::CpalSink;
pub use sink::{AudioSink, MemorySink, NullSink, SinkFormat};

use crate::config::{AudioConfig, SinkBackend};

/// Build the sink selected by the configuration (not yet configured)
pub fn sink_from_config(config: &AudioConfig) -> Box<dyn AudioSink> {
    match config.backend {
        SinkBackend::Cpal => Box::new(CpalSink::new(config.device.clone())),
        SinkBackend::Null => Box::new(NullSink::new()),
    }
}
