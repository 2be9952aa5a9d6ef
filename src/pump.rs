//! Transcode pump
//!
//! One pass wires a source through a [`CodecDriver`] into a sink:
//! - encode: raw PCM bytes in, ADTS-framed AAC out
//! - decode: a demuxed container in (first audio track), raw PCM out
//!
//! The pass runs to completion on the calling thread and cannot be
//! cancelled. The codec session is released when the pass ends, however it
//! ends; source and sink are closed when they are dropped.

use std::io::{BufWriter, Read, Write};

use serde::Serialize;

use crate::adts::{self, AdtsConfig};
use crate::codec::{CodecFactory, Direction};
use crate::config::{DriverConfig, PumpConfig};
use crate::driver::{AccessUnit, Chunk, CodecDriver, DriverStats, InputFeed, UnitSink};
use crate::error::{PumpError, Result};
use crate::format::AudioFormatDescriptor;
use crate::track::{select_audio_track, TrackSource};

/// What a pass reads from
pub enum PumpSource<'a> {
    /// Raw little-endian PCM, encode direction
    Pcm(Box<dyn Read + 'a>),
    /// A demuxed container, decode direction
    Container(Box<dyn TrackSource + 'a>),
}

/// Outcome of a successful pass
#[derive(Debug, Clone, Serialize)]
pub struct PumpReport {
    /// Bytes that reached the sink, ADTS headers included
    pub bytes_written: u64,
    pub stats: DriverStats,
}

/// Fill `buf` from `reader` as far as it will go. Returns the byte count,
/// which is short only at end of input.
pub(crate) fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Feeds raw PCM from a reader. Timestamps are left to the driver, which
/// derives them from the byte count.
pub struct PcmFeed<R> {
    reader: R,
}

impl<R: Read> PcmFeed<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: Read> InputFeed for PcmFeed<R> {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<Option<Chunk>> {
        let len = read_full(&mut self.reader, buf)?;
        if len == 0 {
            return Ok(None);
        }
        Ok(Some(Chunk { len, pts_us: None }))
    }
}

/// Feeds the selected track of a [`TrackSource`], one sample per chunk
pub struct TrackFeed<'a, T: TrackSource + ?Sized> {
    source: &'a mut T,
}

impl<'a, T: TrackSource + ?Sized> TrackFeed<'a, T> {
    pub fn new(source: &'a mut T) -> Self {
        Self { source }
    }
}

impl<'a, T: TrackSource + ?Sized> InputFeed for TrackFeed<'a, T> {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<Option<Chunk>> {
        self.source.read_sample(buf)
    }
}

/// Writes each access unit as one ADTS frame: header, then payload
pub struct AdtsFramingSink<W: Write> {
    writer: W,
    config: AdtsConfig,
    frames: u64,
}

impl<W: Write> AdtsFramingSink<W> {
    pub fn new(writer: W, config: AdtsConfig) -> Self {
        Self {
            writer,
            config,
            frames: 0,
        }
    }

    /// Frames written so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> UnitSink for AdtsFramingSink<W> {
    fn write_unit(&mut self, unit: &AccessUnit<'_>) -> Result<usize> {
        let header = adts::frame_header(unit.data.len(), &self.config)?;
        self.writer.write_all(&header)?;
        self.writer.write_all(unit.data)?;
        self.frames += 1;
        Ok(header.len() + unit.data.len())
    }
}

/// Writes decoded PCM as is
pub struct RawPcmSink<W: Write> {
    writer: W,
}

impl<W: Write> RawPcmSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> UnitSink for RawPcmSink<W> {
    fn write_unit(&mut self, unit: &AccessUnit<'_>) -> Result<usize> {
        self.writer.write_all(unit.data)?;
        Ok(unit.data.len())
    }
}

/// Runs encode and decode passes with codecs from `F`
pub struct TranscodePump<F: CodecFactory> {
    factory: F,
    driver: DriverConfig,
    aac_profile: u8,
}

impl<F: CodecFactory> TranscodePump<F> {
    pub fn new(factory: F, config: &PumpConfig) -> Self {
        Self {
            factory,
            driver: config.driver.clone(),
            aac_profile: config.audio.aac_profile,
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Run one pass. `format` is the PCM format: what the source holds when
    /// encoding, what the sink receives when decoding.
    pub fn run<W: Write>(
        &self,
        source: PumpSource<'_>,
        sink: W,
        direction: Direction,
        format: &AudioFormatDescriptor,
    ) -> Result<PumpReport> {
        match (direction, source) {
            (Direction::Encode, PumpSource::Pcm(reader)) => self.run_encode(reader, sink, format),
            (Direction::Decode, PumpSource::Container(tracks)) => {
                self.run_decode(tracks, sink, format)
            }
            (Direction::Encode, PumpSource::Container(_)) => Err(PumpError::Configuration(
                "encode reads raw PCM, not a container".into(),
            )),
            (Direction::Decode, PumpSource::Pcm(_)) => Err(PumpError::Configuration(
                "decode reads a container, not raw PCM".into(),
            )),
        }
    }

    fn run_encode<W: Write>(
        &self,
        reader: Box<dyn Read + '_>,
        sink: W,
        format: &AudioFormatDescriptor,
    ) -> Result<PumpReport> {
        let framing = AdtsConfig::for_format(format, self.aac_profile)?;
        let codec = self.factory.create_encoder(format)?;
        let mut driver = CodecDriver::new(codec, Direction::Encode, format.clone(), &self.driver);

        let mut feed = PcmFeed::new(reader);
        let mut sink = AdtsFramingSink::new(BufWriter::new(sink), framing);
        let stats = driver.run(&mut feed, &mut sink)?;
        sink.flush()?;

        tracing::info!(
            session = %driver.id(),
            frames = sink.frames(),
            bytes = stats.bytes_out,
            "encode finished"
        );
        Ok(PumpReport {
            bytes_written: stats.bytes_out,
            stats,
        })
    }

    fn run_decode<W: Write>(
        &self,
        mut source: Box<dyn TrackSource + '_>,
        sink: W,
        format: &AudioFormatDescriptor,
    ) -> Result<PumpReport> {
        let track = select_audio_track(source.tracks())?.clone();
        source.select_track(track.index)?;

        let codec = self.factory.create_decoder(&track, format)?;
        let mut input_format = track.format.clone();
        input_format.media_type = track.media_type.clone();
        let mut driver = CodecDriver::new(codec, Direction::Decode, input_format, &self.driver);

        let mut feed = TrackFeed::new(source.as_mut());
        let mut sink = RawPcmSink::new(BufWriter::new(sink));
        let stats = driver.run(&mut feed, &mut sink)?;
        sink.flush()?;

        tracing::info!(
            session = %driver.id(),
            track = track.index,
            bytes = stats.bytes_out,
            "decode finished"
        );
        Ok(PumpReport {
            bytes_written: stats.bytes_out,
            stats,
        })
    }
}

#[cfg(feature = "ffmpeg")]
mod files {
    use std::fs::File;
    use std::io::BufReader;
    use std::path::Path;

    use super::*;
    use crate::transcode::{FfmpegCodecFactory, FfmpegExtractor};

    fn ffmpeg_pump(config: &PumpConfig) -> TranscodePump<FfmpegCodecFactory> {
        let factory = FfmpegCodecFactory::new(config.audio.clone(), config.driver.clone());
        TranscodePump::new(factory, config)
    }

    /// Encode a raw PCM file into an ADTS file with default settings.
    pub fn encode<P: AsRef<Path>, Q: AsRef<Path>>(in_path: P, out_path: Q) -> Result<PumpReport> {
        encode_with_config(in_path, out_path, &PumpConfig::default())
    }

    pub fn encode_with_config<P: AsRef<Path>, Q: AsRef<Path>>(
        in_path: P,
        out_path: Q,
        config: &PumpConfig,
    ) -> Result<PumpReport> {
        let (in_path, out_path) = (in_path.as_ref(), out_path.as_ref());
        tracing::info!(input = %in_path.display(), output = %out_path.display(), "encoding");

        let source = BufReader::new(File::open(in_path)?);
        let sink = File::create(out_path)?;
        ffmpeg_pump(config).run(
            PumpSource::Pcm(Box::new(source)),
            sink,
            Direction::Encode,
            &config.audio.pcm_format(),
        )
    }

    /// Decode the first audio track of a container file into raw PCM.
    pub fn decode<P: AsRef<Path>, Q: AsRef<Path>>(in_path: P, out_path: Q) -> Result<PumpReport> {
        decode_with_config(in_path, out_path, &PumpConfig::default())
    }

    pub fn decode_with_config<P: AsRef<Path>, Q: AsRef<Path>>(
        in_path: P,
        out_path: Q,
        config: &PumpConfig,
    ) -> Result<PumpReport> {
        let (in_path, out_path) = (in_path.as_ref(), out_path.as_ref());
        tracing::info!(input = %in_path.display(), output = %out_path.display(), "decoding");

        let source = FfmpegExtractor::open(in_path)?;
        let sink = File::create(out_path)?;
        ffmpeg_pump(config).run(
            PumpSource::Container(Box::new(source)),
            sink,
            Direction::Decode,
            &config.audio.pcm_format(),
        )
    }
}

#[cfg(feature = "ffmpeg")]
pub use files::{decode, decode_with_config, encode, encode_with_config};
