//! ADTS framing for AAC elementary streams
//!
//! Every access unit written by the encode direction is prefixed with a
//! 7-byte ADTS header (no CRC):
//!
//! ```text
//! byte 0   ssssssss          syncword high
//! byte 1   ssss i ll p       syncword low, MPEG-2 id, layer, protection absent
//! byte 2   PP FFFF x C       profile-1, sampling freq index, private, chan cfg bit 2
//! byte 3   CC xxxx LL        chan cfg bits 1..0, 4 flag bits, frame length 12..11
//! byte 4   LLLLLLLL          frame length 10..3
//! byte 5   LLL BBBBB         frame length 2..0, buffer fullness high
//! byte 6   BBBBBB NN         buffer fullness low, raw data blocks - 1
//! ```

use crate::error::{PumpError, Result};
use crate::format::AudioFormatDescriptor;

/// Size of an ADTS header without CRC
pub const HEADER_LEN: usize = 7;
/// Largest value the 13-bit frame length field can hold
pub const MAX_FRAME_LENGTH: usize = (1 << 13) - 1;
/// Largest payload that still fits a single frame
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LENGTH - HEADER_LEN;

/// AAC audio object type for Low Complexity
pub const PROFILE_AAC_LC: u8 = 2;

// ISO/IEC 14496-3 Table 1.16 - Sampling Frequency Index
const SAMPLING_FREQUENCIES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350,
];

/// Index of `sample_rate` in the ADTS sampling frequency table.
pub fn sampling_frequency_index(sample_rate: u32) -> Option<u8> {
    SAMPLING_FREQUENCIES
        .iter()
        .position(|&rate| rate == sample_rate)
        .map(|i| i as u8)
}

/// Sample rate for an ADTS sampling frequency index.
pub fn sample_rate_for_index(index: u8) -> Option<u32> {
    SAMPLING_FREQUENCIES.get(index as usize).copied()
}

/// The per-stream fields of an ADTS header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsConfig {
    /// Audio object type (2 = AAC-LC); written as `profile - 1`
    pub profile: u8,
    /// Sampling frequency index (4 bits)
    pub freq_index: u8,
    /// Channel configuration (3 bits)
    pub channel_config: u8,
}

impl AdtsConfig {
    /// AAC-LC, 44.1 kHz, mono
    pub const LC_44100_MONO: AdtsConfig = AdtsConfig {
        profile: PROFILE_AAC_LC,
        freq_index: 4,
        channel_config: 1,
    };

    /// Derive the header fields from the stream format.
    pub fn for_format(format: &AudioFormatDescriptor, profile: u8) -> Result<Self> {
        let freq_index = sampling_frequency_index(format.sample_rate).ok_or_else(|| {
            PumpError::Configuration(format!(
                "sample rate {} has no ADTS sampling frequency index",
                format.sample_rate
            ))
        })?;
        if format.channels == 0 || format.channels > 7 {
            return Err(PumpError::Configuration(format!(
                "{} channels cannot be expressed as an ADTS channel configuration",
                format.channels
            )));
        }
        if !(1..=4).contains(&profile) {
            return Err(PumpError::Configuration(format!(
                "audio object type {} does not fit the 2-bit ADTS profile field",
                profile
            )));
        }
        Ok(Self {
            profile,
            freq_index,
            channel_config: format.channels as u8,
        })
    }
}

/// Build the 7-byte header for a frame carrying `payload_len` bytes of AAC.
///
/// The caller writes the header followed by the payload. Payloads larger than
/// [`MAX_PAYLOAD_LEN`] are rejected rather than truncated into the 13-bit
/// length field.
pub fn frame_header(payload_len: usize, config: &AdtsConfig) -> Result<[u8; HEADER_LEN]> {
    let frame_length = payload_len + HEADER_LEN;
    if frame_length > MAX_FRAME_LENGTH {
        return Err(PumpError::FrameTooLarge { frame_length });
    }

    let profile = config.profile.wrapping_sub(1) & 0x03;
    let freq_index = config.freq_index & 0x0F;
    let chan = config.channel_config & 0x07;
    let len = frame_length as u16;

    Ok([
        0xFF,
        0xF9,
        (profile << 6) | (freq_index << 2) | (chan >> 2),
        ((chan & 0x03) << 6) | (len >> 11) as u8,
        ((len & 0x7FF) >> 3) as u8,
        (((len & 0x07) as u8) << 5) | 0x1F,
        0xFC,
    ])
}

/// Fields decoded from an ADTS header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    pub config: AdtsConfig,
    /// Header plus payload, in bytes
    pub frame_length: usize,
    /// 7, or 9 when a CRC follows the fixed header
    pub header_length: usize,
}

impl AdtsHeader {
    pub fn payload_length(&self) -> usize {
        self.frame_length - self.header_length
    }
}

/// Decode the header at the start of `buf`, or `None` if it is not one.
pub fn parse_header(buf: &[u8]) -> Option<AdtsHeader> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    if buf[0] != 0xFF || (buf[1] & 0xF0) != 0xF0 {
        return None;
    }
    let protection_absent = (buf[1] & 0x01) != 0;
    let header_length = if protection_absent { 7 } else { 9 };

    let profile = ((buf[2] >> 6) & 0x03) + 1;
    let freq_index = (buf[2] >> 2) & 0x0F;
    let channel_config = ((buf[2] & 0x01) << 2) | ((buf[3] >> 6) & 0x03);
    let frame_length = (((buf[3] & 0x03) as usize) << 11)
        | ((buf[4] as usize) << 3)
        | ((buf[5] >> 5) as usize & 0x07);

    if frame_length < header_length {
        return None;
    }

    Some(AdtsHeader {
        config: AdtsConfig {
            profile,
            freq_index,
            channel_config,
        },
        frame_length,
        header_length,
    })
}

/// Iterator over consecutive ADTS frames, yielding `(header, payload)`.
///
/// Stops at the first byte that does not start a complete frame.
pub struct FrameIter<'a> {
    data: &'a [u8],
}

/// Walk an ADTS byte stream frame by frame.
pub fn split_frames(data: &[u8]) -> FrameIter<'_> {
    FrameIter { data }
}

impl<'a> FrameIter<'a> {
    /// Bytes not consumed by a complete frame.
    pub fn remainder(&self) -> &'a [u8] {
        self.data
    }
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = (AdtsHeader, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let header = parse_header(self.data)?;
        if self.data.len() < header.frame_length {
            return None;
        }
        let (frame, rest) = self.data.split_at(header.frame_length);
        self.data = rest;
        Some((header, &frame[header.header_length..]))
    }
}
