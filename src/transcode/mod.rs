//! FFmpeg-backed codecs
//!
//! This module provides:
//! - an AAC encoder and a generic audio decoder behind [`MediaCodec`]
//! - s16 resampling for decoder output
//! - a container extractor implementing [`TrackSource`](crate::track::TrackSource)
//! - [`FfmpegCodecFactory`], which the pump uses to create sessions

pub mod decoder;
pub mod encoder;
pub mod extractor;
pub mod media_type;
mod queues;
pub mod resampler;

pub use decoder::AudioDecoderCodec;
pub use encoder::AacEncoderCodec;
pub use extractor::FfmpegExtractor;

use crate::codec::{CodecFactory, MediaCodec};
use crate::config::{AudioConfig, DriverConfig};
use crate::error::Result;
use crate::format::AudioFormatDescriptor;
use crate::track::TrackInfo;

/// Creates FFmpeg codec sessions from the pump configuration
#[derive(Debug, Clone, Default)]
pub struct FfmpegCodecFactory {
    audio: AudioConfig,
    driver: DriverConfig,
}

impl FfmpegCodecFactory {
    pub fn new(audio: AudioConfig, driver: DriverConfig) -> Self {
        Self { audio, driver }
    }
}

impl CodecFactory for FfmpegCodecFactory {
    fn create_encoder(&self, input: &AudioFormatDescriptor) -> Result<Box<dyn MediaCodec>> {
        let codec =
            AacEncoderCodec::open(input, self.audio.bit_rate, self.audio.aac_profile, &self.driver)?;
        Ok(Box::new(codec))
    }

    fn create_decoder(
        &self,
        track: &TrackInfo,
        output: &AudioFormatDescriptor,
    ) -> Result<Box<dyn MediaCodec>> {
        let codec = AudioDecoderCodec::open(track, output, &self.driver)?;
        Ok(Box::new(codec))
    }
}
