//! Cross-module scenarios
//!
//! - driver: the fill/drain loop against a scripted codec
//! - pump: encode and decode passes end to end with stub codecs
//! - roundtrip: PCM -> ADTS -> PCM through the real FFmpeg codecs

pub mod driver;
