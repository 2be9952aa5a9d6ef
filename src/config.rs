//! Pump configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::format::AudioFormatDescriptor;

/// Audio format configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// PCM sample rate in Hz
    pub sample_rate: u32,

    /// PCM channel count
    pub channels: u16,

    /// PCM bit depth
    pub bit_depth: u16,

    /// AAC bitrate in bps
    pub bit_rate: u64,

    /// AAC audio object type (2 = LC)
    pub aac_profile: u8,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 1,
            bit_depth: 16,
            bit_rate: 64000,
            aac_profile: 2,
        }
    }
}

impl AudioConfig {
    /// The raw PCM format this configuration describes.
    pub fn pcm_format(&self) -> AudioFormatDescriptor {
        AudioFormatDescriptor::pcm(self.sample_rate, self.channels, self.bit_depth)
    }
}

/// Codec driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Bounded wait for a free input slot / ready output slot
    pub dequeue_timeout_ms: u64,

    /// Abort when neither side progresses for this long
    pub stall_timeout_secs: u64,

    /// Number of input slots the FFmpeg backend exposes
    pub input_slots: usize,

    /// Number of output slots the FFmpeg backend exposes
    pub output_slots: usize,

    /// Input slot capacity for decoders (one compressed sample must fit)
    pub decode_input_capacity: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            dequeue_timeout_ms: 10,
            stall_timeout_secs: 10,
            input_slots: 4,
            output_slots: 4,
            decode_input_capacity: 64 * 1024,
        }
    }
}

impl DriverConfig {
    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }
}

/// Playback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Bytes read from the source and written to the sink per chunk.
    /// The sink's minimum buffer size wins when it is larger.
    pub chunk_bytes: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self { chunk_bytes: 4096 }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Output format (pretty, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Top-level pump configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PumpConfig {
    pub audio: AudioConfig,
    pub driver: DriverConfig,
    pub playback: PlaybackConfig,
    pub logging: LoggingConfig,
}
