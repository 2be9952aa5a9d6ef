//! Codec abstraction
//!
//! A codec is driven through two independent buffer queues:
//! - the input side hands out empty slots (`dequeue_input_buffer`) and takes
//!   them back filled (`queue_input_buffer`)
//! - the output side hands out filled slots (`dequeue_output_buffer`) and takes
//!   them back once consumed (`release_output_buffer`)
//!
//! The output side can also report control signals instead of a slot.

pub mod slots;

use std::ops::BitOr;
use std::time::Duration;

use serde::Serialize;

use crate::error::Result;
use crate::format::AudioFormatDescriptor;
use crate::track::TrackInfo;

pub use slots::SlotPool;

/// Which way a session converts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// PCM in, compressed access units out
    Encode,
    /// Compressed access units in, PCM out
    Decode,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Encode => write!(f, "encode"),
            Direction::Decode => write!(f, "decode"),
        }
    }
}

/// Flags attached to a queued or dequeued unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferFlags(u32);

impl BufferFlags {
    pub const NONE: BufferFlags = BufferFlags(0);
    /// Last unit on this side of the codec
    pub const END_OF_STREAM: BufferFlags = BufferFlags(1 << 0);
    /// Side-channel codec configuration, never written to the sink
    pub const CODEC_CONFIG: BufferFlags = BufferFlags(1 << 1);

    pub fn contains(self, other: BufferFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_end_of_stream(self) -> bool {
        self.contains(Self::END_OF_STREAM)
    }

    pub fn is_codec_config(self) -> bool {
        self.contains(Self::CODEC_CONFIG)
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for BufferFlags {
    type Output = BufferFlags;

    fn bitor(self, rhs: BufferFlags) -> BufferFlags {
        BufferFlags(self.0 | rhs.0)
    }
}

/// Metadata of a dequeued output slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferInfo {
    pub offset: usize,
    pub size: usize,
    pub pts_us: i64,
    pub flags: BufferFlags,
}

/// Result of polling the output side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEvent {
    /// Slot `index` of the current output pool holds a unit
    Buffer { index: usize, info: BufferInfo },
    /// Nothing ready within the timeout
    TryAgainLater,
    /// The output pool was replaced; fetch it again before indexing
    BuffersChanged,
    /// The output format changed; informational
    FormatChanged,
}

/// A stateful encoder or decoder with asynchronous input/output queues.
///
/// Output bytes are only reachable through [`output_pool`](Self::output_pool),
/// so a driver always indexes the pool that is current at the time of access.
pub trait MediaCodec {
    fn name(&self) -> &str;

    fn start(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    /// Free codec resources. Safe to call more than once.
    fn release(&mut self);

    /// Wait up to `timeout` for a free input slot.
    fn dequeue_input_buffer(&mut self, timeout: Duration) -> Result<Option<usize>>;

    /// Writable range of a dequeued input slot. Its length is the slot capacity,
    /// which may differ from call to call.
    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8]>;

    /// Hand a filled input slot to the codec.
    fn queue_input_buffer(
        &mut self,
        index: usize,
        size: usize,
        pts_us: i64,
        flags: BufferFlags,
    ) -> Result<()>;

    /// Wait up to `timeout` for an output unit or a control signal.
    fn dequeue_output_buffer(&mut self, timeout: Duration) -> Result<OutputEvent>;

    /// The current output pool.
    fn output_pool(&self) -> &SlotPool;

    /// Give a dequeued output slot back to the codec.
    fn release_output_buffer(&mut self, index: usize) -> Result<()>;

    /// Format of the units on the output side, once known.
    fn output_format(&self) -> Option<AudioFormatDescriptor>;
}

impl<C: MediaCodec + ?Sized> MediaCodec for Box<C> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn dequeue_input_buffer(&mut self, timeout: Duration) -> Result<Option<usize>> {
        (**self).dequeue_input_buffer(timeout)
    }

    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8]> {
        (**self).input_buffer(index)
    }

    fn queue_input_buffer(
        &mut self,
        index: usize,
        size: usize,
        pts_us: i64,
        flags: BufferFlags,
    ) -> Result<()> {
        (**self).queue_input_buffer(index, size, pts_us, flags)
    }

    fn dequeue_output_buffer(&mut self, timeout: Duration) -> Result<OutputEvent> {
        (**self).dequeue_output_buffer(timeout)
    }

    fn output_pool(&self) -> &SlotPool {
        (**self).output_pool()
    }

    fn release_output_buffer(&mut self, index: usize) -> Result<()> {
        (**self).release_output_buffer(index)
    }

    fn output_format(&self) -> Option<AudioFormatDescriptor> {
        (**self).output_format()
    }
}

/// Creates configured codec sessions for the pump.
pub trait CodecFactory {
    /// An encoder consuming PCM in `input` format.
    fn create_encoder(&self, input: &AudioFormatDescriptor) -> Result<Box<dyn MediaCodec>>;

    /// A decoder for `track` producing PCM in `output` format.
    fn create_decoder(
        &self,
        track: &TrackInfo,
        output: &AudioFormatDescriptor,
    ) -> Result<Box<dyn MediaCodec>>;
}
