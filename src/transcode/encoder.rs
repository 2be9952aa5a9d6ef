//! AAC encoder codec
//!
//! Wraps an FFmpeg `AVCodecContext` behind the [`MediaCodec`] queues.
//! Input slots carry interleaved little-endian s16 PCM; the encoder wants
//! planar f32 in frames of exactly `frame_size` samples, so queued bytes are
//! collected until a whole frame is available.

use std::time::Duration;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::Sample;

use super::queues::{CodecQueues, ReadyUnit};
use crate::codec::{BufferFlags, MediaCodec, OutputEvent, SlotPool};
use crate::config::DriverConfig;
use crate::error::{FfmpegError, PumpError, Result};
use crate::ffmpeg_utils::{self, samples_to_us};
use crate::format::AudioFormatDescriptor;

/// Sample format the AAC encoder takes
pub const ENCODER_SAMPLE_FMT: Sample = Sample::F32(ffmpeg::util::format::sample::Type::Planar);
/// AAC encoder frame size (samples per channel per frame)
pub const AAC_FRAME_SIZE: usize = 1024;

/// Room for one AAC frame at any sane bit rate
const OUTPUT_SLOT_CAPACITY: usize = 8192;

/// Settings needed to (re)open the encoder
#[derive(Debug, Clone)]
struct EncoderParams {
    input: AudioFormatDescriptor,
    bit_rate: u64,
    profile: u8,
}

/// An FFmpeg AAC encoder driven through buffer queues
pub struct AacEncoderCodec {
    params: EncoderParams,
    encoder: Option<ffmpeg::encoder::Audio>,
    queues: CodecQueues,
    output_format: AudioFormatDescriptor,
    layout: ChannelLayout,
    frame_size: usize,
    pending: Vec<u8>,
    frames_sent: i64,
    packets_out: u64,
    base_pts_us: Option<i64>,
}

impl AacEncoderCodec {
    /// Open an AAC encoder for s16 PCM in `input` format.
    pub fn open(
        input: &AudioFormatDescriptor,
        bit_rate: u64,
        profile: u8,
        driver: &DriverConfig,
    ) -> Result<Self> {
        if !input.is_raw_pcm() || input.bit_depth != 16 {
            return Err(PumpError::Configuration(format!(
                "AAC encoder takes 16-bit raw PCM, got {}",
                input
            )));
        }
        let layout = match input.channels {
            1 => ChannelLayout::MONO,
            2 => ChannelLayout::STEREO,
            n => {
                return Err(PumpError::Configuration(format!(
                    "AAC encoder supports mono or stereo input, got {} channels",
                    n
                )))
            }
        };

        ffmpeg_utils::init()?;
        let params = EncoderParams {
            input: input.clone(),
            bit_rate,
            profile,
        };
        let encoder = open_encoder(&params, layout)?;
        let frame_size = match encoder.frame_size() as usize {
            0 => AAC_FRAME_SIZE,
            n => n,
        };

        let input_capacity = frame_size * input.bytes_per_frame() as usize;
        let queues = CodecQueues::new(
            driver.input_slots,
            input_capacity,
            driver.output_slots,
            OUTPUT_SLOT_CAPACITY,
        );

        tracing::debug!(
            input = %input,
            bit_rate,
            frame_size,
            "opened AAC encoder"
        );

        Ok(Self {
            params,
            encoder: Some(encoder),
            queues,
            output_format: AudioFormatDescriptor::aac(input.sample_rate, input.channels),
            layout,
            frame_size,
            pending: Vec::new(),
            frames_sent: 0,
            packets_out: 0,
            base_pts_us: None,
        })
    }

    /// Samples per channel in one encoded frame.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn frame_bytes(&self) -> usize {
        self.frame_size * self.params.input.bytes_per_frame() as usize
    }

    fn encoder_mut(&mut self) -> Result<&mut ffmpeg::encoder::Audio> {
        self.encoder
            .as_mut()
            .ok_or_else(|| PumpError::illegal_state("encode", "encoder released"))
    }

    /// Convert `pcm` (at most one frame, zero-padded) and send it.
    fn send_pcm(&mut self, pcm: &[u8]) -> Result<()> {
        let channels = self.params.input.channels as usize;
        let mut frame =
            ffmpeg::util::frame::Audio::new(ENCODER_SAMPLE_FMT, self.frame_size, self.layout);
        frame.set_rate(self.params.input.sample_rate);
        frame.set_pts(Some(self.frames_sent * self.frame_size as i64));

        for ch in 0..channels {
            let plane = frame.data_mut(ch);
            for (i, out) in plane[..self.frame_size * 4].chunks_exact_mut(4).enumerate() {
                let at = (i * channels + ch) * 2;
                let sample = match pcm.get(at..at + 2) {
                    Some(b) => i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0,
                    None => 0.0,
                };
                out.copy_from_slice(&sample.to_le_bytes());
            }
        }

        self.encoder_mut()?
            .send_frame(&frame)
            .map_err(|e| FfmpegError::EncodeFrame(format!("send_frame: {}", e)))?;
        self.frames_sent += 1;
        self.receive_packets()
    }

    /// Move every packet the encoder has ready into the output queue.
    fn receive_packets(&mut self) -> Result<()> {
        loop {
            let mut packet = ffmpeg::codec::packet::Packet::empty();
            match self.encoder_mut()?.receive_packet(&mut packet) {
                Ok(()) => {}
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                    return Ok(())
                }
                Err(ffmpeg::Error::Eof) => return Ok(()),
                Err(e) => {
                    return Err(FfmpegError::EncodeFrame(format!("receive_packet: {}", e)).into())
                }
            }

            // Packet timestamps include the encoder's priming delay and can be
            // negative, so units are stamped from the packet count instead.
            let pts_us = self.base_pts_us.unwrap_or(0)
                + samples_to_us(
                    self.packets_out * self.frame_size as u64,
                    self.params.input.sample_rate,
                );
            self.packets_out += 1;

            if let Some(data) = packet.data() {
                self.queues.push_ready(ReadyUnit {
                    data: data.to_vec(),
                    pts_us,
                    flags: BufferFlags::NONE,
                });
            }
        }
    }

    fn finish(&mut self, pts_us: i64) -> Result<()> {
        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            self.send_pcm(&tail)?;
        }
        self.encoder_mut()?
            .send_eof()
            .map_err(|e| FfmpegError::EncodeFrame(format!("send_eof: {}", e)))?;
        self.receive_packets()?;

        tracing::debug!(
            frames = self.frames_sent,
            packets = self.packets_out,
            "AAC encoder flushed"
        );
        self.queues.push_ready(ReadyUnit {
            data: Vec::new(),
            pts_us,
            flags: BufferFlags::END_OF_STREAM,
        });
        Ok(())
    }

    fn announce_output(&mut self) {
        self.queues.signal(OutputEvent::FormatChanged);
        let config = match &self.encoder {
            Some(encoder) => codec_config(encoder),
            None => Vec::new(),
        };
        if !config.is_empty() {
            self.queues.push_ready(ReadyUnit {
                data: config,
                pts_us: 0,
                flags: BufferFlags::CODEC_CONFIG,
            });
        }
    }
}

impl MediaCodec for AacEncoderCodec {
    fn name(&self) -> &str {
        "ffmpeg-aac-encoder"
    }

    fn start(&mut self) -> Result<()> {
        if self.queues.is_released() {
            return Err(PumpError::illegal_state("start", "encoder released"));
        }
        if self.encoder.is_none() {
            self.encoder = Some(open_encoder(&self.params, self.layout)?);
        }
        self.queues.start()?;
        self.announce_output();
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.queues.stop()?;
        // A flushed encoder cannot take more frames; reopen on the next start
        self.encoder = None;
        self.pending.clear();
        self.frames_sent = 0;
        self.packets_out = 0;
        self.base_pts_us = None;
        Ok(())
    }

    fn release(&mut self) {
        self.queues.release();
        self.encoder = None;
        self.pending.clear();
    }

    fn dequeue_input_buffer(&mut self, _timeout: Duration) -> Result<Option<usize>> {
        self.queues.dequeue_input()
    }

    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8]> {
        self.queues.input_buffer(index)
    }

    fn queue_input_buffer(
        &mut self,
        index: usize,
        size: usize,
        pts_us: i64,
        flags: BufferFlags,
    ) -> Result<()> {
        let data = self.queues.take_input(index, size, flags)?;
        self.pending.extend_from_slice(data);
        if self.base_pts_us.is_none() && size > 0 {
            self.base_pts_us = Some(pts_us);
        }

        let frame_bytes = self.frame_bytes();
        while self.pending.len() >= frame_bytes {
            let rest = self.pending.split_off(frame_bytes);
            let frame = std::mem::replace(&mut self.pending, rest);
            self.send_pcm(&frame)?;
        }

        if flags.is_end_of_stream() {
            self.finish(pts_us)?;
        }
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, _timeout: Duration) -> Result<OutputEvent> {
        self.queues.dequeue_output()
    }

    fn output_pool(&self) -> &SlotPool {
        self.queues.output_pool()
    }

    fn release_output_buffer(&mut self, index: usize) -> Result<()> {
        self.queues.release_output(index)
    }

    fn output_format(&self) -> Option<AudioFormatDescriptor> {
        Some(self.output_format.clone())
    }
}

fn open_encoder(params: &EncoderParams, layout: ChannelLayout) -> Result<ffmpeg::encoder::Audio> {
    let codec = codec::encoder::find(codec::Id::AAC).ok_or_else(|| {
        PumpError::Configuration("AAC encoder not found in this FFmpeg build".into())
    })?;

    let sample_rate = params.input.sample_rate;
    let mut context = codec::Context::new_with_codec(codec);
    context.set_time_base(ffmpeg::Rational::new(1, sample_rate as i32));

    let mut audio_enc = context.encoder().audio().map_err(|e| {
        FfmpegError::EncoderCreate(format!("cannot get audio encoder handle: {}", e))
    })?;

    audio_enc.set_rate(sample_rate as i32);
    audio_enc.set_format(ENCODER_SAMPLE_FMT);
    audio_enc.set_channel_layout(layout);
    audio_enc.set_bit_rate(params.bit_rate as usize);
    // SAFETY: plain field store on a context that has not been opened yet.
    // FFmpeg numbers AAC profiles as audio object type minus one.
    unsafe {
        (*audio_enc.as_mut_ptr()).profile = params.profile as i32 - 1;
    }

    audio_enc.open_as(codec).map_err(|e| {
        PumpError::Configuration(format!(
            "failed to open AAC encoder for {}: {}",
            params.input, e
        ))
    })
}

/// The AudioSpecificConfig the opened encoder put in its extradata.
fn codec_config(encoder: &ffmpeg::encoder::Audio) -> Vec<u8> {
    let ctx: &ffmpeg::codec::Context = encoder;
    // SAFETY: extradata is owned by the context and stays valid while the
    // borrow of `encoder` lives; it is copied out before returning.
    unsafe {
        let raw = ctx.as_ptr();
        let data = (*raw).extradata;
        let size = (*raw).extradata_size;
        if data.is_null() || size <= 0 {
            return Vec::new();
        }
        std::slice::from_raw_parts(data, size as usize).to_vec()
    }
}
