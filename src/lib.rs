//! PCM <-> AAC transcoding pump
//!
//! Drives a stateful codec through its asynchronous input/output buffer
//! queues, frames encoded access units as ADTS, and streams raw PCM into an
//! audio sink for playback.
//!
//! The FFmpeg backend (feature `ffmpeg`, on by default) supplies the real
//! AAC encoder, decoders and container extractor; everything else works
//! against the [`MediaCodec`] and [`TrackSource`] traits.

pub mod adts;
pub mod codec;
pub mod config;
pub mod config_file;
pub mod driver;
pub mod error;
pub mod format;
pub mod playback;
pub mod pump;
pub mod track;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_utils;
#[cfg(feature = "ffmpeg")]
pub mod transcode;

#[cfg(test)]
pub(crate) mod tests;

pub use codec::{BufferFlags, CodecFactory, Direction, MediaCodec, OutputEvent, SlotPool};
pub use config::PumpConfig;
pub use driver::{CodecDriver, DriverStats, SessionState};
pub use error::{FfmpegError, PumpError, Result};
pub use format::AudioFormatDescriptor;
pub use playback::{AudioSink, PlaybackEvent, PlaybackPump, PlaybackState, WriterSink};
pub use pump::{PumpReport, PumpSource, TranscodePump};
pub use track::{select_audio_track, TrackInfo, TrackSource};

#[cfg(feature = "ffmpeg")]
pub use pump::{decode, decode_with_config, encode, encode_with_config};
