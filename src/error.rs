use std::time::Duration;

use thiserror::Error;

/// Main error type for the transcoding pump
#[derive(Error, Debug)]
pub enum PumpError {
    /// The codec could not be created or configured. Raised before any I/O.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Decode input has no track whose media type starts with `audio/`
    #[error("No audio track found in source")]
    NoAudioTrack,

    /// Source or sink read/write failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An operation was invoked outside the state it is valid in
    #[error("Illegal session state: cannot {operation} while {state}")]
    IllegalSessionState {
        operation: &'static str,
        state: String,
    },

    /// An output unit arrived with a timestamp below the emitted watermark.
    /// The unit is dropped and the pump keeps going.
    #[error("Ordering anomaly: output pts {pts_us}us is behind watermark {watermark_us}us")]
    OrderingAnomaly { pts_us: i64, watermark_us: i64 },

    /// The ADTS frame length does not fit the 13-bit field
    #[error("Frame too large: {frame_length} bytes exceeds the 8191-byte ADTS limit")]
    FrameTooLarge { frame_length: usize },

    /// Neither side of the codec made progress within the stall timeout
    #[error("Codec stalled: no progress for {idle:?}")]
    Stalled { idle: Duration },

    /// An error originating from the FFmpeg backend
    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] FfmpegError),
}

impl PumpError {
    /// Shorthand for a state violation.
    pub fn illegal_state(operation: &'static str, state: impl std::fmt::Debug) -> Self {
        PumpError::IllegalSessionState {
            operation,
            state: format!("{:?}", state),
        }
    }

    /// Whether this error aborts the pass. Ordering anomalies are recovered
    /// by dropping the offending unit.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PumpError::OrderingAnomaly { .. })
    }
}

/// FFmpeg-specific errors
#[derive(Error, Debug)]
pub enum FfmpegError {
    #[error("FFmpeg initialization failed: {0}")]
    InitFailed(String),

    #[error("Failed to open input file: {0}")]
    OpenInput(String),

    #[error("Failed to read packet: {0}")]
    ReadPacket(String),

    #[error("Failed to find encoder: {0}")]
    EncoderNotFound(String),

    #[error("Failed to create encoder: {0}")]
    EncoderCreate(String),

    #[error("Failed to find decoder: {0}")]
    DecoderNotFound(String),

    #[error("Failed to create decoder: {0}")]
    DecoderCreate(String),

    #[error("Failed to encode frame: {0}")]
    EncodeFrame(String),

    #[error("Failed to decode packet: {0}")]
    DecodePacket(String),

    #[error("Failed to create resampler: {0}")]
    ResamplerCreate(String),

    #[error("Resampling error: {0}")]
    Resample(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, PumpError>;
