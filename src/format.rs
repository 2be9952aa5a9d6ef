//! Audio format descriptors and media-type strings

use serde::{Deserialize, Serialize};

/// Media type of raw linear PCM
pub const MIME_RAW: &str = "audio/raw";
/// Media type of AAC elementary streams
pub const MIME_AAC: &str = "audio/mp4a-latm";
/// Prefix shared by every audio media type
pub const AUDIO_PREFIX: &str = "audio/";

/// Sample rate, channel count, bit depth and media type of a stream.
///
/// Fixed once a codec session has been configured with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormatDescriptor {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
    pub media_type: String,
}

impl AudioFormatDescriptor {
    /// Signed little-endian linear PCM.
    pub fn pcm(sample_rate: u32, channels: u16, bit_depth: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bit_depth,
            media_type: MIME_RAW.to_string(),
        }
    }

    /// AAC-LC at the given rate and channel count.
    pub fn aac(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bit_depth: 16,
            media_type: MIME_AAC.to_string(),
        }
    }

    pub fn bytes_per_sample(&self) -> u64 {
        (self.bit_depth as u64).div_ceil(8)
    }

    /// Bytes of one sample frame: one sample for every channel.
    pub fn bytes_per_frame(&self) -> u64 {
        self.channels as u64 * self.bytes_per_sample()
    }

    /// Bytes of PCM per second of audio. Zero for malformed descriptors.
    pub fn bytes_per_second(&self) -> u64 {
        self.sample_rate as u64 * self.bytes_per_frame()
    }

    /// Presentation time of the PCM byte at offset `bytes`.
    ///
    /// Assumes constant-bitrate PCM; returns 0 if the descriptor has no rate.
    pub fn pts_for_bytes(&self, bytes: u64) -> i64 {
        let per_second = self.bytes_per_second();
        if per_second == 0 {
            return 0;
        }
        (1_000_000u128 * bytes as u128 / per_second as u128) as i64
    }

    pub fn is_audio(&self) -> bool {
        self.media_type.starts_with(AUDIO_PREFIX)
    }

    pub fn is_raw_pcm(&self) -> bool {
        self.media_type == MIME_RAW
    }
}

impl Default for AudioFormatDescriptor {
    fn default() -> Self {
        Self::pcm(44100, 1, 16)
    }
}

impl std::fmt::Display for AudioFormatDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}Hz {}ch {}bit",
            self.media_type, self.sample_rate, self.channels, self.bit_depth
        )
    }
}
