//! Codec driver
//!
//! Pumps one codec session through its two buffer queues:
//! - fill: source bytes into free input slots, until the source is exhausted
//!   and an end-of-stream unit has been queued
//! - drain: ready output units into a [`UnitSink`], until the codec reports
//!   end-of-stream on its output side
//!
//! Input usually finishes well before output, since a codec may hold several
//! input units before it produces anything. The loop therefore runs on the
//! output flag only.

use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

use crate::codec::{BufferFlags, BufferInfo, Direction, MediaCodec, OutputEvent};
use crate::config::DriverConfig;
use crate::error::{PumpError, Result};
use crate::format::AudioFormatDescriptor;

/// One chunk read from a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Bytes written into the buffer
    pub len: usize,
    /// Timestamp carried by the source, if it has one. Raw PCM sources leave
    /// this empty and the driver derives it from the byte count.
    pub pts_us: Option<i64>,
}

/// Where the fill side pulls its data from
pub trait InputFeed {
    /// Fill the front of `buf`. `None` (or a zero-length chunk) ends the input.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<Option<Chunk>>;
}

/// A unit leaving the codec
#[derive(Debug, Clone, Copy)]
pub struct AccessUnit<'a> {
    pub data: &'a [u8],
    pub pts_us: i64,
    pub flags: BufferFlags,
}

/// Where the drain side pushes its data to
pub trait UnitSink {
    /// Write one unit; returns the number of bytes that reached the sink.
    fn write_unit(&mut self, unit: &AccessUnit<'_>) -> Result<usize>;
}

/// Lifecycle of a codec session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Configured, not started
    Ready,
    /// Both sides are being pumped
    Running,
    /// Input end-of-stream queued, output still flowing
    InputDraining,
    /// Both sides reached end-of-stream
    Done,
    /// Resources freed
    Released,
}

/// An output unit dropped for arriving behind the watermark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DroppedUnit {
    pub pts_us: i64,
    pub watermark_us: i64,
}

/// Counters collected over one pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct DriverStats {
    pub input_units: u64,
    pub bytes_in: u64,
    pub units_emitted: u64,
    pub bytes_out: u64,
    pub config_units: u64,
    pub pool_changes: u64,
    pub format_changes: u64,
    pub dropped: Vec<DroppedUnit>,
    /// Flags of the last non-config output unit
    pub final_unit_flags: BufferFlags,
}

impl DriverStats {
    pub fn units_dropped(&self) -> usize {
        self.dropped.len()
    }
}

/// Per-session accumulators. Never shared between sessions.
#[derive(Debug, Default)]
struct CodecSession {
    input_end_reached: bool,
    output_end_reached: bool,
    last_emitted_pts_us: i64,
    bytes_so_far: u64,
    next_input_pts_us: i64,
    output_events: u64,
}

/// Drives one codec session to completion.
///
/// The session is released when the driver is dropped, whichever way the
/// pass ended.
pub struct CodecDriver<C: MediaCodec> {
    id: Uuid,
    direction: Direction,
    codec: C,
    input_format: AudioFormatDescriptor,
    state: SessionState,
    session: CodecSession,
    staging: Vec<u8>,
    output_generation: u64,
    dequeue_timeout: Duration,
    stall_timeout: Duration,
    stats: DriverStats,
}

impl<C: MediaCodec> CodecDriver<C> {
    /// Wrap a configured codec. `input_format` describes what the fill side
    /// feeds it and is used to derive timestamps for raw PCM.
    pub fn new(
        codec: C,
        direction: Direction,
        input_format: AudioFormatDescriptor,
        config: &DriverConfig,
    ) -> Self {
        let output_generation = codec.output_pool().generation();
        Self {
            id: Uuid::new_v4(),
            direction,
            codec,
            input_format,
            state: SessionState::Ready,
            session: CodecSession::default(),
            staging: Vec::new(),
            output_generation,
            dequeue_timeout: config.dequeue_timeout(),
            stall_timeout: config.stall_timeout(),
            stats: DriverStats::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> &DriverStats {
        &self.stats
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn is_input_done(&self) -> bool {
        self.session.input_end_reached
    }

    pub fn is_output_done(&self) -> bool {
        self.session.output_end_reached
    }

    /// Start the codec. Only valid from `Ready`.
    pub fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Ready {
            return Err(PumpError::illegal_state("start", self.state));
        }
        self.codec.start()?;
        self.session = CodecSession::default();
        self.stats = DriverStats::default();
        self.output_generation = self.codec.output_pool().generation();
        self.state = SessionState::Running;

        tracing::info!(
            session = %self.id,
            codec = self.codec.name(),
            direction = %self.direction,
            input = %self.input_format,
            "codec session started"
        );
        Ok(())
    }

    /// Stop a started codec and return to `Ready`.
    pub fn stop(&mut self) -> Result<()> {
        match self.state {
            SessionState::Running | SessionState::InputDraining | SessionState::Done => {
                self.codec.stop()?;
                self.session = CodecSession::default();
                self.state = SessionState::Ready;
                tracing::debug!(session = %self.id, "codec session stopped");
                Ok(())
            }
            state => Err(PumpError::illegal_state("stop", state)),
        }
    }

    /// Free the codec. Idempotent.
    pub fn release(&mut self) {
        if self.state == SessionState::Released {
            return;
        }
        self.codec.release();
        self.state = SessionState::Released;
        tracing::debug!(session = %self.id, "codec session released");
    }

    fn ensure_pumpable(&self, operation: &'static str) -> Result<()> {
        match self.state {
            SessionState::Running | SessionState::InputDraining => Ok(()),
            state => Err(PumpError::illegal_state(operation, state)),
        }
    }

    /// Move one chunk from `feed` into the codec, if an input slot frees up
    /// within the dequeue timeout.
    pub fn fill<F: InputFeed + ?Sized>(&mut self, feed: &mut F) -> Result<()> {
        self.ensure_pumpable("fill")?;
        if self.session.input_end_reached {
            return Ok(());
        }

        let index = match self.codec.dequeue_input_buffer(self.dequeue_timeout)? {
            Some(index) => index,
            None => return Ok(()),
        };

        let capacity = self.codec.input_buffer(index)?.len();
        if self.staging.len() != capacity {
            tracing::trace!(session = %self.id, capacity, "resizing staging buffer");
            self.staging.resize(capacity, 0);
        }

        match feed.read_chunk(&mut self.staging)? {
            Some(chunk) if chunk.len > 0 => {
                if chunk.len > capacity {
                    return Err(PumpError::Io(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!(
                            "source produced {} bytes for a {}-byte input slot",
                            chunk.len, capacity
                        ),
                    )));
                }
                self.codec.input_buffer(index)?[..chunk.len]
                    .copy_from_slice(&self.staging[..chunk.len]);

                let pts_us = chunk.pts_us.unwrap_or_else(|| self.derived_pts());
                self.session.bytes_so_far += chunk.len as u64;
                self.session.next_input_pts_us = chunk.pts_us.unwrap_or_else(|| self.derived_pts());

                self.codec
                    .queue_input_buffer(index, chunk.len, pts_us, BufferFlags::NONE)?;
                self.stats.input_units += 1;
                self.stats.bytes_in += chunk.len as u64;

                tracing::trace!(
                    session = %self.id,
                    index,
                    size = chunk.len,
                    pts_us,
                    "queued input unit"
                );
            }
            _ => {
                let pts_us = self.session.next_input_pts_us;
                self.codec
                    .queue_input_buffer(index, 0, pts_us, BufferFlags::END_OF_STREAM)?;
                self.session.input_end_reached = true;
                self.state = SessionState::InputDraining;

                tracing::debug!(
                    session = %self.id,
                    pts_us,
                    bytes = self.session.bytes_so_far,
                    "input end of stream queued"
                );
            }
        }
        Ok(())
    }

    /// Timestamp of the next PCM byte. Compressed inputs always carry their
    /// own timestamps, so this only matters for raw PCM.
    fn derived_pts(&self) -> i64 {
        if self.input_format.is_raw_pcm() {
            self.input_format.pts_for_bytes(self.session.bytes_so_far)
        } else {
            self.session.next_input_pts_us
        }
    }

    /// Take one event off the output side, if any arrives within the
    /// dequeue timeout.
    pub fn drain<S: UnitSink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        self.ensure_pumpable("drain")?;

        match self.codec.dequeue_output_buffer(self.dequeue_timeout)? {
            OutputEvent::TryAgainLater => {}
            OutputEvent::BuffersChanged => {
                self.session.output_events += 1;
                self.output_generation = self.codec.output_pool().generation();
                self.stats.pool_changes += 1;
                tracing::debug!(
                    session = %self.id,
                    generation = self.output_generation,
                    slots = self.codec.output_pool().len(),
                    "output buffers changed"
                );
            }
            OutputEvent::FormatChanged => {
                self.session.output_events += 1;
                self.stats.format_changes += 1;
                match self.codec.output_format() {
                    Some(format) => {
                        tracing::info!(session = %self.id, %format, "output format changed")
                    }
                    None => tracing::info!(session = %self.id, "output format changed"),
                }
            }
            OutputEvent::Buffer { index, info } => {
                self.session.output_events += 1;
                self.consume(index, info, sink)?;
            }
        }
        Ok(())
    }

    fn consume<S: UnitSink + ?Sized>(
        &mut self,
        index: usize,
        info: BufferInfo,
        sink: &mut S,
    ) -> Result<()> {
        if info.flags.is_codec_config() {
            self.stats.config_units += 1;
            tracing::debug!(session = %self.id, size = info.size, "skipping codec config unit");
            return self.codec.release_output_buffer(index);
        }

        let emitted = if info.size > 0 {
            self.emit(index, &info, sink)
        } else {
            Ok(())
        };
        // The slot goes back to the codec even when emitting failed
        let released = self.codec.release_output_buffer(index);
        emitted?;
        released?;

        self.stats.final_unit_flags = info.flags;
        if info.flags.is_end_of_stream() {
            self.session.output_end_reached = true;
            self.state = SessionState::Done;
            tracing::debug!(session = %self.id, pts_us = info.pts_us, "output end of stream");
        }
        Ok(())
    }

    fn emit<S: UnitSink + ?Sized>(
        &mut self,
        index: usize,
        info: &BufferInfo,
        sink: &mut S,
    ) -> Result<()> {
        let pool = self.codec.output_pool();
        if pool.generation() != self.output_generation {
            return Err(PumpError::IllegalSessionState {
                operation: "read output slot",
                state: format!(
                    "output pool is at generation {} but no BuffersChanged was seen since {}",
                    pool.generation(),
                    self.output_generation
                ),
            });
        }

        let watermark_us = self.session.last_emitted_pts_us;
        if info.pts_us < watermark_us {
            let anomaly = PumpError::OrderingAnomaly {
                pts_us: info.pts_us,
                watermark_us,
            };
            tracing::warn!(session = %self.id, size = info.size, "{}; unit dropped", anomaly);
            self.stats.dropped.push(DroppedUnit {
                pts_us: info.pts_us,
                watermark_us,
            });
            return Ok(());
        }

        let data = pool.readable(index, info.offset, info.size)?;
        let written = sink.write_unit(&AccessUnit {
            data,
            pts_us: info.pts_us,
            flags: info.flags,
        })?;

        self.session.last_emitted_pts_us = info.pts_us;
        self.stats.units_emitted += 1;
        self.stats.bytes_out += written as u64;

        tracing::trace!(
            session = %self.id,
            index,
            size = info.size,
            pts_us = info.pts_us,
            written,
            "emitted output unit"
        );
        Ok(())
    }

    fn progress_marker(&self) -> (u64, bool, u64) {
        (
            self.stats.input_units,
            self.session.input_end_reached,
            self.session.output_events,
        )
    }

    /// Alternate fill and drain until the output side reports end-of-stream.
    ///
    /// Starts the session first if it is still `Ready`.
    pub fn run<F, S>(&mut self, feed: &mut F, sink: &mut S) -> Result<DriverStats>
    where
        F: InputFeed + ?Sized,
        S: UnitSink + ?Sized,
    {
        if self.state == SessionState::Ready {
            self.start()?;
        }
        self.ensure_pumpable("run")?;

        let mut last_progress = Instant::now();
        while !self.session.output_end_reached {
            let before = self.progress_marker();

            if !self.session.input_end_reached {
                self.fill(feed)?;
            }
            self.drain(sink)?;

            if self.progress_marker() != before {
                last_progress = Instant::now();
            } else if last_progress.elapsed() > self.stall_timeout {
                return Err(PumpError::Stalled {
                    idle: last_progress.elapsed(),
                });
            }
        }

        tracing::info!(
            session = %self.id,
            units = self.stats.units_emitted,
            bytes_in = self.stats.bytes_in,
            bytes_out = self.stats.bytes_out,
            dropped = self.stats.units_dropped(),
            "codec session done"
        );
        Ok(self.stats.clone())
    }
}

impl<C: MediaCodec> Drop for CodecDriver<C> {
    fn drop(&mut self) {
        self.release();
    }
}
