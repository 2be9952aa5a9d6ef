//! Configuration file support
//!
//! Loads pump configuration from TOML files. Every section is optional; missing
//! values fall back to the defaults in [`crate::config`].

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::{AudioConfig, DriverConfig, LoggingConfig, PlaybackConfig, PumpConfig};

/// Configuration file format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Audio settings
    pub audio: Option<AudioSettings>,
    /// Driver settings
    pub driver: Option<DriverSettings>,
    /// Playback settings
    pub playback: Option<PlaybackSettings>,
    /// Logging settings
    pub logging: Option<LoggingSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioSettings {
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub bit_depth: Option<u16>,
    pub bit_rate: Option<u64>,
    pub aac_profile: Option<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverSettings {
    pub dequeue_timeout_ms: Option<u64>,
    pub stall_timeout_secs: Option<u64>,
    pub input_slots: Option<usize>,
    pub output_slots: Option<usize>,
    pub decode_input_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaybackSettings {
    pub chunk_bytes: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: Option<String>,
    /// Output format (json, pretty)
    pub format: Option<String>,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: ConfigFile = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Generate default configuration file
    pub fn default_config() -> Self {
        let audio = AudioConfig::default();
        let driver = DriverConfig::default();
        let logging = LoggingConfig::default();
        Self {
            audio: Some(AudioSettings {
                sample_rate: Some(audio.sample_rate),
                channels: Some(audio.channels),
                bit_depth: Some(audio.bit_depth),
                bit_rate: Some(audio.bit_rate),
                aac_profile: Some(audio.aac_profile),
            }),
            driver: Some(DriverSettings {
                dequeue_timeout_ms: Some(driver.dequeue_timeout_ms),
                stall_timeout_secs: Some(driver.stall_timeout_secs),
                input_slots: Some(driver.input_slots),
                output_slots: Some(driver.output_slots),
                decode_input_capacity: Some(driver.decode_input_capacity),
            }),
            playback: Some(PlaybackSettings {
                chunk_bytes: Some(PlaybackConfig::default().chunk_bytes),
            }),
            logging: Some(LoggingSettings {
                level: Some(logging.level),
                format: Some(logging.format),
            }),
        }
    }

    /// Convert to PumpConfig
    pub fn into_pump_config(self) -> PumpConfig {
        let defaults = PumpConfig::default();
        let audio = self.audio.unwrap_or_default();
        let driver = self.driver.unwrap_or_default();
        let playback = self.playback.unwrap_or_default();
        let logging = self.logging.unwrap_or_default();

        PumpConfig {
            audio: AudioConfig {
                sample_rate: audio.sample_rate.unwrap_or(defaults.audio.sample_rate),
                channels: audio.channels.unwrap_or(defaults.audio.channels),
                bit_depth: audio.bit_depth.unwrap_or(defaults.audio.bit_depth),
                bit_rate: audio.bit_rate.unwrap_or(defaults.audio.bit_rate),
                aac_profile: audio.aac_profile.unwrap_or(defaults.audio.aac_profile),
            },
            driver: DriverConfig {
                dequeue_timeout_ms: driver
                    .dequeue_timeout_ms
                    .unwrap_or(defaults.driver.dequeue_timeout_ms),
                stall_timeout_secs: driver
                    .stall_timeout_secs
                    .unwrap_or(defaults.driver.stall_timeout_secs),
                input_slots: driver.input_slots.unwrap_or(defaults.driver.input_slots),
                output_slots: driver.output_slots.unwrap_or(defaults.driver.output_slots),
                decode_input_capacity: driver
                    .decode_input_capacity
                    .unwrap_or(defaults.driver.decode_input_capacity),
            },
            playback: PlaybackConfig {
                chunk_bytes: playback
                    .chunk_bytes
                    .unwrap_or(defaults.playback.chunk_bytes),
            },
            logging: LoggingConfig {
                level: logging.level.unwrap_or(defaults.logging.level),
                format: logging.format.unwrap_or(defaults.logging.format),
            },
        }
    }
}

/// Generate default configuration file at the specified path
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigFile::default_config();
    config.to_file(path)?;
    Ok(())
}
