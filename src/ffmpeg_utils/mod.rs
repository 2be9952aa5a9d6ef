//! FFmpeg library setup and small helpers shared by the backend
//!
//! This module handles:
//! - one-time library initialization
//! - quieting FFmpeg's own stderr logging
//! - timestamp conversion between stream time bases and microseconds

use std::sync::OnceLock;

use crate::error::FfmpegError;

pub use ffmpeg_next as ffmpeg;

static INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Initialize the FFmpeg library.
///
/// Safe to call repeatedly; only the first call does any work, and its
/// outcome (success or failure) is returned to every later caller. Every
/// constructor of an FFmpeg-backed type calls this, so tests and library
/// users do not have to.
pub fn init() -> Result<(), FfmpegError> {
    init_once(&INIT, || {
        ffmpeg::init()?;
        quiet_logs();
        tracing::debug!("FFmpeg initialized");
        Ok(())
    })
}

fn init_once<F>(cell: &OnceLock<Result<(), String>>, setup: F) -> Result<(), FfmpegError>
where
    F: FnOnce() -> Result<(), ffmpeg::Error>,
{
    cell.get_or_init(|| setup().map_err(|e| format!("ffmpeg::init() failed: {}", e)))
        .clone()
        .map_err(FfmpegError::InitFailed)
}

/// Limit FFmpeg's own logging to warnings and errors.
fn quiet_logs() {
    // SAFETY: sets a global integer in libavutil; called once, from inside
    // `init`, before any codec is opened.
    unsafe {
        ffmpeg::ffi::av_log_set_level(ffmpeg::ffi::AV_LOG_WARNING as i32);
    }
}

/// Check whether the FFmpeg build includes an AAC encoder.
pub fn is_aac_encoder_available() -> bool {
    if init().is_err() {
        return false;
    }
    ffmpeg::codec::encoder::find(ffmpeg::codec::Id::AAC).is_some()
}

/// Check whether the FFmpeg build includes an AAC decoder.
pub fn is_aac_decoder_available() -> bool {
    if init().is_err() {
        return false;
    }
    ffmpeg::codec::decoder::find(ffmpeg::codec::Id::AAC).is_some()
}

/// Convert a timestamp in `time_base` units to microseconds.
pub fn ts_to_us(ts: i64, time_base: ffmpeg::Rational) -> i64 {
    let num = time_base.numerator() as i128;
    let den = time_base.denominator() as i128;
    if den == 0 {
        return 0;
    }
    (ts as i128 * num * 1_000_000 / den) as i64
}

/// Microseconds covered by `samples` samples at `rate` Hz.
pub fn samples_to_us(samples: u64, rate: u32) -> i64 {
    if rate == 0 {
        return 0;
    }
    (samples as u128 * 1_000_000 / rate as u128) as i64
}
