//! Mixer configuration
//!
//! Every field has a default matching the fixed settings of the original
//! Raspberry Pi deployment, so an absent or partial `mixer.toml` is fine.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// File name looked up in the platform config directory
pub const CONFIG_FILE_NAME: &str = "mixer.toml";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MixerConfig {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub mixer: EngineConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    pub max_clients: usize,
    /// Back-off after a failed `accept`
    pub accept_retry_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkBackend {
    /// System audio device through cpal
    Cpal,
    /// Discard output in real time (headless operation)
    Null,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AudioConfig {
    pub backend: SinkBackend,
    /// Output device name; the host default when absent
    pub device: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    pub buffer_frames: u32,
    /// Explicit period size; negotiated from `buffer_frames` when absent
    pub period_frames: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cycle_delay_ms: u64,
    pub stats_interval_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            max_clients: DEFAULT_MAX_CLIENTS,
            accept_retry_ms: 1000,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            backend: SinkBackend::Cpal,
            device: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            buffer_frames: DEFAULT_BUFFER_FRAMES,
            period_frames: None,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cycle_delay_ms: DEFAULT_CYCLE_DELAY.as_millis() as u64,
            stats_interval_secs: 5,
        }
    }
}

impl NetworkConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn accept_retry(&self) -> Duration {
        Duration::from_millis(self.accept_retry_ms)
    }
}

impl EngineConfig {
    pub fn cycle_delay(&self) -> Duration {
        Duration::from_millis(self.cycle_delay_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}

impl MixerConfig {
    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, `mixer.toml` in the
    /// platform config directory is used if present, else the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.network.max_clients == 0 {
            return Err(Error::Config("max_clients must be at least 1".to_string()));
        }

        let audio = &self.audio;
        if !(1..=2).contains(&audio.channels) {
            return Err(Error::Config(format!(
                "Unsupported channel count: {}",
                audio.channels
            )));
        }
        if audio.sample_rate == 0 || audio.buffer_frames == 0 {
            return Err(Error::Config(
                "sample_rate and buffer_frames must be non-zero".to_string(),
            ));
        }
        if let Some(period) = audio.period_frames {
            if period == 0 || period as usize >= MAX_PERIOD_FRAMES {
                return Err(Error::Config(format!(
                    "period_frames must be in 1..{}, got {}",
                    MAX_PERIOD_FRAMES, period
                )));
            }
            if period > audio.buffer_frames {
                return Err(Error::Config(format!(
                    "period_frames {} larger than buffer_frames {}",
                    period, audio.buffer_frames
                )));
            }
        }

        Ok(())
    }
}

/// `<config dir>/mixer.toml` for this application, if the platform has one
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("org", "raspberrystem", "net-audio-mixer")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}
