//! Audio resampler for the decode direction
//!
//! Converts whatever the decoder produces (usually planar float) into
//! interleaved little-endian s16 at the requested rate and channel count.

use ffmpeg_next as ffmpeg;
use ffmpeg_next::software::resampling;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::Sample;

use crate::error::{FfmpegError, PumpError, Result};
use crate::format::AudioFormatDescriptor;

/// Sample format written to the PCM sink
pub const PCM_SAMPLE_FORMAT: Sample = Sample::I16(ffmpeg::util::format::sample::Type::Packed);

/// Channel layout for a plain channel count.
pub fn layout_for_channels(channels: u16) -> ChannelLayout {
    match channels {
        1 => ChannelLayout::MONO,
        _ => ChannelLayout::STEREO,
    }
}

/// FFmpeg `SwrContext` producing s16 PCM bytes
pub struct PcmResampler {
    context: resampling::Context,
    output_rate: u32,
    output_channels: u16,
}

impl PcmResampler {
    /// Create a resampler from the format of `src_frame` to `target`.
    pub fn new(src_frame: &ffmpeg::util::frame::Audio, target: &AudioFormatDescriptor) -> Result<Self> {
        if target.bit_depth != 16 || !(1..=2).contains(&target.channels) {
            return Err(PumpError::Configuration(format!(
                "PCM output must be 16-bit mono or stereo, got {}",
                target
            )));
        }

        let src_layout = if src_frame.channel_layout().bits() == 0 {
            // No channel layout set; fall back based on channel count
            layout_for_channels(src_frame.channels())
        } else {
            src_frame.channel_layout()
        };

        let context = resampling::Context::get(
            src_frame.format(),
            src_layout,
            src_frame.rate(),
            PCM_SAMPLE_FORMAT,
            layout_for_channels(target.channels),
            target.sample_rate,
        )
        .map_err(|e| {
            FfmpegError::ResamplerCreate(format!(
                "{:?} {}Hz -> s16 {}Hz: {}",
                src_frame.format(),
                src_frame.rate(),
                target.sample_rate,
                e
            ))
        })?;

        Ok(Self {
            context,
            output_rate: target.sample_rate,
            output_channels: target.channels,
        })
    }

    /// Convert one decoded frame. Returns no bytes when the resampler is
    /// still buffering.
    pub fn convert(&mut self, frame: &ffmpeg::util::frame::Audio) -> Result<Vec<u8>> {
        // swr_convert_frame allocates the output buffer itself, so the
        // output frame must start out empty
        let mut out = ffmpeg::util::frame::Audio::empty();
        self.context
            .run(frame, &mut out)
            .map_err(|e| FfmpegError::Resample(e.to_string()))?;
        Ok(self.packed_bytes(&out))
    }

    /// Drain samples still held for rate conversion.
    ///
    /// A passthrough context has nothing buffered and reports an error here,
    /// which is not one.
    pub fn flush(&mut self) -> Vec<u8> {
        let mut out = ffmpeg::util::frame::Audio::empty();
        match self.context.flush(&mut out) {
            Ok(_) => self.packed_bytes(&out),
            Err(e) => {
                tracing::debug!("resampler flush returned non-fatal error: {}", e);
                Vec::new()
            }
        }
    }

    fn packed_bytes(&self, out: &ffmpeg::util::frame::Audio) -> Vec<u8> {
        if out.samples() == 0 {
            return Vec::new();
        }
        let len = out.samples() * self.output_channels as usize * 2;
        let data = out.data(0);
        data[..len.min(data.len())].to_vec()
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_frame(samples: usize, rate: u32) -> ffmpeg::util::frame::Audio {
        crate::ffmpeg_utils::init().unwrap();
        let mut frame = ffmpeg::util::frame::Audio::new(
            Sample::F32(ffmpeg::util::format::sample::Type::Planar),
            samples,
            ChannelLayout::MONO,
        );
        frame.set_rate(rate);
        for (i, out) in frame.data_mut(0)[..samples * 4]
            .chunks_exact_mut(4)
            .enumerate()
        {
            let v = if i % 2 == 0 { 0.5f32 } else { -0.5f32 };
            out.copy_from_slice(&v.to_le_bytes());
        }
        frame
    }

    #[test]
    fn test_layout_for_channels() {
        assert_eq!(layout_for_channels(1), ChannelLayout::MONO);
        assert_eq!(layout_for_channels(2), ChannelLayout::STEREO);
    }

    #[test]
    fn test_rejects_24_bit_output() {
        let frame = f32_frame(16, 44_100);
        let target = AudioFormatDescriptor::pcm(44_100, 1, 24);
        assert!(matches!(
            PcmResampler::new(&frame, &target),
            Err(PumpError::Configuration(_))
        ));
    }

    #[test]
    fn test_same_rate_conversion_to_s16() {
        let frame = f32_frame(1024, 44_100);
        let target = AudioFormatDescriptor::pcm(44_100, 1, 16);
        let mut resampler = PcmResampler::new(&frame, &target).unwrap();
        let mut bytes = resampler.convert(&frame).unwrap();
        bytes.extend(resampler.flush());
        assert_eq!(bytes.len(), 2048);
        let first = i16::from_le_bytes([bytes[0], bytes[1]]);
        assert!((first as i32 - 16384).abs() <= 1, "got {}", first);
        assert_eq!(resampler.output_rate(), 44_100);
    }
}
