//! Container demuxing for the decode direction

use std::path::Path;

use bytes::Bytes;
use ffmpeg_next as ffmpeg;

use super::media_type::media_type_for;
use crate::driver::Chunk;
use crate::error::{FfmpegError, PumpError, Result};
use crate::ffmpeg_utils::{self, ts_to_us};
use crate::format::AudioFormatDescriptor;
use crate::track::{TrackInfo, TrackSource};

/// Reads tracks and samples from any container FFmpeg can open
pub struct FfmpegExtractor {
    input: ffmpeg::format::context::Input,
    tracks: Vec<TrackInfo>,
    time_bases: Vec<ffmpeg::Rational>,
    selected: Option<usize>,
    last_pts_us: i64,
}

impl FfmpegExtractor {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        ffmpeg_utils::init()?;

        if !path.exists() {
            return Err(PumpError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            )));
        }

        let input = ffmpeg::format::input(&path)
            .map_err(|e| FfmpegError::OpenInput(format!("{}: {}", path.display(), e)))?;

        let mut tracks = Vec::new();
        let mut time_bases = Vec::new();
        for stream in input.streams() {
            let params = stream.parameters();
            let media_type = media_type_for(params.id(), params.medium());
            // SAFETY: the parameters belong to a stream of `input`, which
            // outlives this loop; extradata is copied out.
            let (sample_rate, channels, codec_config) = unsafe {
                let raw = params.as_ptr();
                let extradata = if (*raw).extradata.is_null() || (*raw).extradata_size <= 0 {
                    Bytes::new()
                } else {
                    Bytes::copy_from_slice(std::slice::from_raw_parts(
                        (*raw).extradata,
                        (*raw).extradata_size as usize,
                    ))
                };
                (
                    (*raw).sample_rate.max(0) as u32,
                    (*raw).ch_layout.nb_channels.max(0) as u16,
                    extradata,
                )
            };

            let format = AudioFormatDescriptor {
                sample_rate,
                channels,
                bit_depth: 16,
                media_type: media_type.clone(),
            };
            tracing::debug!(
                path = %path.display(),
                index = stream.index(),
                media_type = %media_type,
                sample_rate,
                channels,
                "found track"
            );
            tracks.push(TrackInfo {
                index: stream.index(),
                media_type,
                format,
                codec_config,
            });
            time_bases.push(stream.time_base());
        }

        Ok(Self {
            input,
            tracks,
            time_bases,
            selected: None,
            last_pts_us: 0,
        })
    }
}

impl TrackSource for FfmpegExtractor {
    fn tracks(&self) -> &[TrackInfo] {
        &self.tracks
    }

    fn select_track(&mut self, index: usize) -> Result<()> {
        if index >= self.tracks.len() {
            return Err(PumpError::Configuration(format!(
                "track {} does not exist ({} tracks)",
                index,
                self.tracks.len()
            )));
        }
        self.selected = Some(index);
        Ok(())
    }

    fn read_sample(&mut self, buf: &mut [u8]) -> Result<Option<Chunk>> {
        let selected = self
            .selected
            .ok_or_else(|| PumpError::illegal_state("read sample", "no track selected"))?;

        loop {
            let mut packet = ffmpeg::codec::packet::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(e) => return Err(FfmpegError::ReadPacket(e.to_string()).into()),
            }
            if packet.stream() != selected {
                continue;
            }
            let data = match packet.data() {
                Some(data) if !data.is_empty() => data,
                _ => continue,
            };
            if data.len() > buf.len() {
                return Err(PumpError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!(
                        "sample of {} bytes does not fit a {}-byte input slot",
                        data.len(),
                        buf.len()
                    ),
                )));
            }
            buf[..data.len()].copy_from_slice(data);

            let pts_us = match packet.pts().or(packet.dts()) {
                Some(ts) => ts_to_us(ts, self.time_bases[selected]),
                None => self.last_pts_us,
            };
            self.last_pts_us = pts_us;
            return Ok(Some(Chunk {
                len: data.len(),
                pts_us: Some(pts_us),
            }));
        }
    }
}
