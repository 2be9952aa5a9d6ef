//! Audio decoder codec
//!
//! Wraps an FFmpeg `AVCodecContext` behind the [`MediaCodec`] queues.
//! Compressed access units go in; interleaved s16 PCM at the requested
//! output format comes out.

use std::time::Duration;

use ffmpeg_next as ffmpeg;

use super::media_type::codec_id_for;
use super::queues::{CodecQueues, ReadyUnit};
use super::resampler::PcmResampler;
use crate::codec::{BufferFlags, MediaCodec, OutputEvent, SlotPool};
use crate::config::DriverConfig;
use crate::error::{FfmpegError, PumpError, Result};
use crate::ffmpeg_utils::{self, samples_to_us};
use crate::format::AudioFormatDescriptor;
use crate::track::TrackInfo;

/// Initial output slot size; the pool grows when a frame needs more
const OUTPUT_SLOT_CAPACITY: usize = 16 * 1024;

/// An FFmpeg audio decoder driven through buffer queues
pub struct AudioDecoderCodec {
    track: TrackInfo,
    output: AudioFormatDescriptor,
    decoder: Option<ffmpeg::decoder::Audio>,
    resampler: Option<PcmResampler>,
    queues: CodecQueues,
    base_pts_us: Option<i64>,
    samples_out: u64,
}

impl AudioDecoderCodec {
    /// Open a decoder for `track` producing PCM in `output` format.
    ///
    /// The track's codec-specific data (for AAC, the AudioSpecificConfig) is
    /// handed to the decoder as extradata.
    pub fn open(
        track: &TrackInfo,
        output: &AudioFormatDescriptor,
        driver: &DriverConfig,
    ) -> Result<Self> {
        if output.bit_depth != 16 {
            return Err(PumpError::Configuration(format!(
                "decoder writes 16-bit PCM, {} requested",
                output
            )));
        }
        ffmpeg_utils::init()?;
        let decoder = open_decoder(track)?;

        tracing::debug!(
            track = track.index,
            media_type = %track.media_type,
            output = %output,
            "opened audio decoder"
        );

        Ok(Self {
            track: track.clone(),
            output: output.clone(),
            decoder: Some(decoder),
            resampler: None,
            queues: CodecQueues::new(
                driver.input_slots,
                driver.decode_input_capacity,
                driver.output_slots,
                OUTPUT_SLOT_CAPACITY,
            ),
            base_pts_us: None,
            samples_out: 0,
        })
    }

    fn decoder_mut(&mut self) -> Result<&mut ffmpeg::decoder::Audio> {
        self.decoder
            .as_mut()
            .ok_or_else(|| PumpError::illegal_state("decode", "decoder released"))
    }

    /// Send a compressed packet and collect whatever frames it completes.
    ///
    /// `AVERROR_INVALIDDATA` is not fatal: the unit is skipped with a debug
    /// log and decoding carries on.
    fn send_packet(&mut self, packet: &ffmpeg::codec::packet::Packet) -> Result<()> {
        match self.decoder_mut()?.send_packet(packet) {
            Ok(()) => {}
            Err(ffmpeg::Error::InvalidData) => {
                tracing::debug!(track = self.track.index, "skipping undecodable unit");
                return Ok(());
            }
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                // Decoder is full; drain it and try once more
                self.receive_frames()?;
                self.decoder_mut()?
                    .send_packet(packet)
                    .map_err(|e| FfmpegError::DecodePacket(format!("send_packet: {}", e)))?;
            }
            Err(e) => {
                return Err(FfmpegError::DecodePacket(format!("send_packet: {}", e)).into())
            }
        }
        self.receive_frames()
    }

    fn receive_frames(&mut self) -> Result<()> {
        loop {
            let mut frame = ffmpeg::util::frame::Audio::empty();
            match self.decoder_mut()?.receive_frame(&mut frame) {
                Ok(()) => self.push_frame(&frame)?,
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                    return Ok(())
                }
                Err(ffmpeg::Error::Eof) => return Ok(()),
                Err(e) => {
                    return Err(FfmpegError::DecodePacket(format!("receive_frame: {}", e)).into())
                }
            }
        }
    }

    fn push_frame(&mut self, frame: &ffmpeg::util::frame::Audio) -> Result<()> {
        if self.resampler.is_none() {
            tracing::debug!(
                format = ?frame.format(),
                rate = frame.rate(),
                channels = frame.channels(),
                "first decoded frame"
            );
            self.resampler = Some(PcmResampler::new(frame, &self.output)?);
            self.queues.signal(OutputEvent::FormatChanged);
        }
        let pcm = match self.resampler.as_mut() {
            Some(resampler) => resampler.convert(frame)?,
            None => Vec::new(),
        };
        self.push_pcm(pcm);
        Ok(())
    }

    fn push_pcm(&mut self, pcm: Vec<u8>) {
        if pcm.is_empty() {
            return;
        }
        let frame_bytes = self.output.bytes_per_frame().max(1);
        let pts_us =
            self.base_pts_us.unwrap_or(0) + samples_to_us(self.samples_out, self.output.sample_rate);
        self.samples_out += pcm.len() as u64 / frame_bytes;
        self.queues.push_ready(ReadyUnit {
            data: pcm,
            pts_us,
            flags: BufferFlags::NONE,
        });
    }

    fn finish(&mut self, pts_us: i64) -> Result<()> {
        match self.decoder_mut()?.send_eof() {
            Ok(()) => {}
            // Already drained, or nothing buffered
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {}
            Err(ffmpeg::Error::Eof) => {}
            Err(e) => return Err(FfmpegError::DecodePacket(format!("send_eof: {}", e)).into()),
        }
        self.receive_frames()?;

        let tail = match self.resampler.as_mut() {
            Some(resampler) => resampler.flush(),
            None => Vec::new(),
        };
        self.push_pcm(tail);

        tracing::debug!(samples = self.samples_out, "audio decoder flushed");
        let end_us = self.base_pts_us.unwrap_or(pts_us)
            + samples_to_us(self.samples_out, self.output.sample_rate);
        self.queues.push_ready(ReadyUnit {
            data: Vec::new(),
            pts_us: end_us.max(pts_us),
            flags: BufferFlags::END_OF_STREAM,
        });
        Ok(())
    }
}

impl MediaCodec for AudioDecoderCodec {
    fn name(&self) -> &str {
        "ffmpeg-audio-decoder"
    }

    fn start(&mut self) -> Result<()> {
        if self.queues.is_released() {
            return Err(PumpError::illegal_state("start", "decoder released"));
        }
        if self.decoder.is_none() {
            self.decoder = Some(open_decoder(&self.track)?);
        }
        self.queues.start()
    }

    fn stop(&mut self) -> Result<()> {
        self.queues.stop()?;
        self.decoder = None;
        self.resampler = None;
        self.base_pts_us = None;
        self.samples_out = 0;
        Ok(())
    }

    fn release(&mut self) {
        self.queues.release();
        self.decoder = None;
        self.resampler = None;
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
        let packet = if data.is_empty() {
            None
        } else {
            Some(ffmpeg::codec::packet::Packet::copy(data))
        };

        if let Some(mut packet) = packet {
            if self.base_pts_us.is_none() {
                self.base_pts_us = Some(pts_us);
            }
            packet.set_pts(Some(pts_us));
            self.send_packet(&packet)?;
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
        Some(self.output.clone())
    }
}

fn open_decoder(track: &TrackInfo) -> Result<ffmpeg::decoder::Audio> {
    let id = codec_id_for(&track.media_type).ok_or_else(|| {
        PumpError::Configuration(format!("no decoder for media type {}", track.media_type))
    })?;
    let codec = ffmpeg::codec::decoder::find(id).ok_or_else(|| {
        PumpError::Configuration(format!(
            "{} decoder not found in this FFmpeg build",
            id.name()
        ))
    })?;

    let mut context = ffmpeg::codec::Context::new_with_codec(codec);
    // SAFETY: the context is freshly allocated and not yet opened. The
    // extradata buffer comes from av_mallocz with the padding FFmpeg
    // requires, and is freed together with the context.
    unsafe {
        let raw = context.as_mut_ptr();
        if track.format.sample_rate > 0 {
            (*raw).sample_rate = track.format.sample_rate as i32;
        }
        if track.format.channels > 0 {
            ffmpeg::ffi::av_channel_layout_default(
                &mut (*raw).ch_layout,
                track.format.channels as i32,
            );
        }
        if !track.codec_config.is_empty() {
            let size = track.codec_config.len();
            let padded = size + ffmpeg::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize;
            let buf = ffmpeg::ffi::av_mallocz(padded) as *mut u8;
            if buf.is_null() {
                return Err(FfmpegError::DecoderCreate("cannot allocate extradata".into()).into());
            }
            std::ptr::copy_nonoverlapping(track.codec_config.as_ptr(), buf, size);
            (*raw).extradata = buf;
            (*raw).extradata_size = size as i32;
        }
    }

    context.decoder().audio().map_err(|e| {
        PumpError::Configuration(format!(
            "failed to open {} decoder for track {}: {}",
            id.name(),
            track.index,
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn aac_track(codec_config: &'static [u8]) -> TrackInfo {
        TrackInfo {
            index: 0,
            media_type: crate::format::MIME_AAC.to_string(),
            format: AudioFormatDescriptor::aac(44_100, 1),
            codec_config: Bytes::from_static(codec_config),
        }
    }

    #[test]
    fn test_unknown_media_type_is_configuration_error() {
        let mut track = aac_track(&[]);
        track.media_type = "audio/unheard-of".to_string();
        let err = AudioDecoderCodec::open(
            &track,
            &AudioFormatDescriptor::default(),
            &DriverConfig::default(),
        );
        assert!(matches!(err, Err(PumpError::Configuration(_))));
    }

    #[test]
    fn test_opens_with_codec_config() {
        if !ffmpeg_utils::is_aac_decoder_available() {
            return;
        }
        let mut dec = AudioDecoderCodec::open(
            &aac_track(&[0x12, 0x08]),
            &AudioFormatDescriptor::default(),
            &DriverConfig::default(),
        )
        .unwrap();
        dec.start().unwrap();
        let index = dec
            .dequeue_input_buffer(Duration::ZERO)
            .unwrap()
            .unwrap();
        assert_eq!(
            dec.input_buffer(index).unwrap().len(),
            DriverConfig::default().decode_input_capacity
        );
    }

    #[test]
    fn test_stereo_timestamps_count_sample_pairs() {
        if !ffmpeg_utils::is_aac_decoder_available() {
            return;
        }
        let mut dec = AudioDecoderCodec::open(
            &aac_track(&[0x12, 0x08]),
            &AudioFormatDescriptor::pcm(44_100, 2, 16),
            &DriverConfig::default(),
        )
        .unwrap();
        dec.start().unwrap();
        // 1024 stereo sample pairs each
        dec.push_pcm(vec![0u8; 4096]);
        dec.push_pcm(vec![0u8; 4096]);

        let mut pts = Vec::new();
        while pts.len() < 2 {
            match dec.dequeue_output_buffer(Duration::ZERO).unwrap() {
                OutputEvent::Buffer { index, info } => {
                    pts.push(info.pts_us);
                    dec.release_output_buffer(index).unwrap();
                }
                OutputEvent::TryAgainLater => panic!("decoder ran dry"),
                _ => {}
            }
        }
        assert_eq!(pts, vec![0, 23_219]);
    }

    #[test]
    fn test_empty_stream_ends_cleanly() {
        if !ffmpeg_utils::is_aac_decoder_available() {
            return;
        }
        let mut dec = AudioDecoderCodec::open(
            &aac_track(&[0x12, 0x08]),
            &AudioFormatDescriptor::default(),
            &DriverConfig::default(),
        )
        .unwrap();
        dec.start().unwrap();
        let index = dec
            .dequeue_input_buffer(Duration::ZERO)
            .unwrap()
            .unwrap();
        dec.queue_input_buffer(index, 0, 0, BufferFlags::END_OF_STREAM)
            .unwrap();
        match dec.dequeue_output_buffer(Duration::ZERO).unwrap() {
            OutputEvent::Buffer { info, .. } => {
                assert!(info.flags.is_end_of_stream());
                assert_eq!(info.size, 0);
            }
            other => panic!("expected end of stream, got {:?}", other),
        }
    }
}
