//! Output device enumeration and lookup

use cpal::traits::{DeviceTrait, HostTrait};

use crate::audio::sink::SinkFormat;
use crate::error::AudioError;

/// Summary of an output device for `--list-devices`
#[derive(Debug, Clone)]
pub struct OutputDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// List all available output devices
pub fn list_output_devices() -> Vec<OutputDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    let mut devices = Vec::new();

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let (sample_rates, channels) = get_device_capabilities(&device);
                devices.push(OutputDeviceInfo {
                    is_default: default_name.as_ref() == Some(&name),
                    name,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    devices
}

fn get_device_capabilities(device: &cpal::Device) -> (Vec<u32>, Vec<u16>) {
    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();

    if let Ok(configs) = device.supported_output_configs() {
        for config in configs {
            for rate_val in [22050u32, 44100, 48000, 88200, 96000] {
                let rate = cpal::SampleRate(rate_val);
                if rate >= config.min_sample_rate()
                    && rate <= config.max_sample_rate()
                    && !sample_rates.contains(&rate_val)
                {
                    sample_rates.push(rate_val);
                }
            }

            let ch = config.channels();
            if !channels.contains(&ch) {
                channels.push(ch);
            }
        }
    }

    sample_rates.sort();
    channels.sort();
    (sample_rates, channels)
}

/// Get an output device by name, or the host default when `name` is `None`
pub fn get_output_device(name: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();

    let Some(name) = name else {
        return host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()));
    };

    let devices = host
        .output_devices()
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(device);
        }
    }

    Err(AudioError::DeviceNotFound(name.to_string()))
}

/// Pick the period size for `format`, honoring the device's buffer-size range.
pub fn negotiate_period(device: &cpal::Device, format: &SinkFormat) -> Result<u32, AudioError> {
    let rate = cpal::SampleRate(format.sample_rate);
    let configs = device
        .supported_output_configs()
        .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))?;

    let matching = configs
        .filter(|c| c.channels() == format.channels)
        .find(|c| rate >= c.min_sample_rate() && rate <= c.max_sample_rate())
        .ok_or_else(|| {
            AudioError::UnsupportedFormat(format!(
                "{} Hz, {} channel(s)",
                format.sample_rate, format.channels
            ))
        })?;

    Ok(clamp_period(format.preferred_period(), matching.buffer_size()))
}

/// Clamp a period size to what the device reports it can do
pub fn clamp_period(preferred: u32, supported: &cpal::SupportedBufferSize) -> u32 {
    match supported {
        cpal::SupportedBufferSize::Range { min, max } => preferred.clamp(*min, (*max).max(*min)),
        cpal::SupportedBufferSize::Unknown => preferred,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_period() {
        let range = cpal::SupportedBufferSize::Range { min: 64, max: 4096 };
        assert_eq!(clamp_period(512, &range), 512);
        assert_eq!(clamp_period(16, &range), 64);

        let narrow = cpal::SupportedBufferSize::Range { min: 1024, max: 2048 };
        assert_eq!(clamp_period(512, &narrow), 1024);

        assert_eq!(clamp_period(512, &cpal::SupportedBufferSize::Unknown), 512);
    }

    #[test]
    fn test_list_devices_does_not_panic() {
        // May be empty on machines without audio hardware
        for device in list_output_devices() {
            assert!(!device.name.is_empty());
        }
    }
}
