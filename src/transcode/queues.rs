//! Buffer-queue bookkeeping shared by the FFmpeg-backed codecs
//!
//! FFmpeg's send/receive API is synchronous, so the codecs process an input
//! slot as soon as it is queued and park the results in `ready` until the
//! driver dequeues an output slot for them.

use std::collections::VecDeque;

use crate::codec::{BufferFlags, BufferInfo, OutputEvent, SlotPool};
use crate::error::{PumpError, Result};

/// A finished unit waiting for a free output slot
#[derive(Debug)]
pub(crate) struct ReadyUnit {
    pub data: Vec<u8>,
    pub pts_us: i64,
    pub flags: BufferFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Configured,
    Started,
    Released,
}

pub(crate) struct CodecQueues {
    input: SlotPool,
    output: SlotPool,
    ready: VecDeque<ReadyUnit>,
    signals: VecDeque<OutputEvent>,
    lifecycle: Lifecycle,
    input_eos: bool,
}

impl CodecQueues {
    pub fn new(
        input_slots: usize,
        input_capacity: usize,
        output_slots: usize,
        output_capacity: usize,
    ) -> Self {
        Self {
            input: SlotPool::new(input_slots.max(1), input_capacity),
            output: SlotPool::new(output_slots.max(1), output_capacity),
            ready: VecDeque::new(),
            signals: VecDeque::new(),
            lifecycle: Lifecycle::Configured,
            input_eos: false,
        }
    }

    fn ensure_started(&self, operation: &'static str) -> Result<()> {
        match self.lifecycle {
            Lifecycle::Started => Ok(()),
            state => Err(PumpError::illegal_state(operation, state)),
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.lifecycle != Lifecycle::Configured {
            return Err(PumpError::illegal_state("start codec", self.lifecycle));
        }
        self.lifecycle = Lifecycle::Started;
        Ok(())
    }

    /// Drop everything in flight and go back to the configured state.
    pub fn stop(&mut self) -> Result<()> {
        self.ensure_started("stop codec")?;
        self.input.replace(self.input.len(), self.input.capacity(0).unwrap_or(0));
        self.output
            .replace(self.output.len(), self.output.capacity(0).unwrap_or(0));
        self.ready.clear();
        self.signals.clear();
        self.input_eos = false;
        self.lifecycle = Lifecycle::Configured;
        Ok(())
    }

    pub fn release(&mut self) {
        self.ready.clear();
        self.signals.clear();
        self.lifecycle = Lifecycle::Released;
    }

    pub fn is_released(&self) -> bool {
        self.lifecycle == Lifecycle::Released
    }

    pub fn dequeue_input(&mut self) -> Result<Option<usize>> {
        self.ensure_started("dequeue input buffer")?;
        if self.input_eos {
            return Ok(None);
        }
        match self.input.first_free() {
            Some(index) => {
                self.input.lend(index)?;
                Ok(Some(index))
            }
            None => Ok(None),
        }
    }

    pub fn input_buffer(&mut self, index: usize) -> Result<&mut [u8]> {
        self.ensure_started("access input buffer")?;
        self.input.writable(index)
    }

    /// Take back a queued input slot and return its first `size` bytes.
    pub fn take_input(&mut self, index: usize, size: usize, flags: BufferFlags) -> Result<&[u8]> {
        self.ensure_started("queue input buffer")?;
        if self.input_eos {
            return Err(PumpError::illegal_state(
                "queue input buffer",
                "input end of stream already queued",
            ));
        }
        self.input.reclaim(index)?;
        if flags.is_end_of_stream() {
            self.input_eos = true;
        }
        let data = self.input.codec_buffer(index)?;
        data.get(..size).ok_or_else(|| PumpError::IllegalSessionState {
            operation: "queue input buffer",
            state: format!("size {} exceeds slot capacity {}", size, data.len()),
        })
    }

    pub fn push_ready(&mut self, unit: ReadyUnit) {
        self.ready.push_back(unit);
    }

    pub fn signal(&mut self, event: OutputEvent) {
        self.signals.push_back(event);
    }

    pub fn output_pool(&self) -> &SlotPool {
        &self.output
    }

    /// Hand out the next control signal or ready unit.
    ///
    /// A unit larger than the output slots makes the pool grow, which is
    /// reported as `BuffersChanged` before the unit itself.
    pub fn dequeue_output(&mut self) -> Result<OutputEvent> {
        self.ensure_started("dequeue output buffer")?;
        if let Some(event) = self.signals.pop_front() {
            return Ok(event);
        }

        let needed = match self.ready.front() {
            Some(unit) => unit.data.len(),
            None => return Ok(OutputEvent::TryAgainLater),
        };

        let capacity = self.output.capacity(0).unwrap_or(0);
        if needed > capacity {
            if self.output.lent() > 0 {
                return Ok(OutputEvent::TryAgainLater);
            }
            let grown = needed.next_power_of_two();
            tracing::debug!(from = capacity, to = grown, "growing output pool");
            self.output.replace(self.output.len(), grown);
            return Ok(OutputEvent::BuffersChanged);
        }

        let index = match self.output.first_free() {
            Some(index) => index,
            None => return Ok(OutputEvent::TryAgainLater),
        };
        let unit = match self.ready.pop_front() {
            Some(unit) => unit,
            None => return Ok(OutputEvent::TryAgainLater),
        };

        let slot = self.output.codec_buffer_mut(index)?;
        slot[..unit.data.len()].copy_from_slice(&unit.data);
        self.output.lend(index)?;

        Ok(OutputEvent::Buffer {
            index,
            info: BufferInfo {
                offset: 0,
                size: unit.data.len(),
                pts_us: unit.pts_us,
                flags: unit.flags,
            },
        })
    }

    pub fn release_output(&mut self, index: usize) -> Result<()> {
        self.ensure_started("release output buffer")?;
        self.output.reclaim(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(output_capacity: usize) -> CodecQueues {
        let mut queues = CodecQueues::new(2, 16, 2, output_capacity);
        queues.start().unwrap();
        queues
    }

    #[test]
    fn test_requires_start() {
        let mut queues = CodecQueues::new(1, 8, 1, 8);
        assert!(queues.dequeue_input().is_err());
        assert!(queues.dequeue_output().is_err());
        queues.start().unwrap();
        assert!(queues.start().is_err());
        assert_eq!(queues.dequeue_input().unwrap(), Some(0));
    }

    #[test]
    fn test_input_round_trip() {
        let mut queues = started(8);
        let index = queues.dequeue_input().unwrap().unwrap();
        queues.input_buffer(index).unwrap()[..3].copy_from_slice(b"abc");
        let data = queues.take_input(index, 3, BufferFlags::NONE).unwrap();
        assert_eq!(data, b"abc");
        // slot is free again
        assert_eq!(queues.dequeue_input().unwrap(), Some(index));
    }

    #[test]
    fn test_no_input_after_eos() {
        let mut queues = started(8);
        let index = queues.dequeue_input().unwrap().unwrap();
        queues
            .take_input(index, 0, BufferFlags::END_OF_STREAM)
            .unwrap();
        assert_eq!(queues.dequeue_input().unwrap(), None);
    }

    #[test]
    fn test_signals_come_first() {
        let mut queues = started(8);
        queues.push_ready(ReadyUnit {
            data: vec![1, 2],
            pts_us: 0,
            flags: BufferFlags::NONE,
        });
        queues.signal(OutputEvent::FormatChanged);
        assert_eq!(queues.dequeue_output().unwrap(), OutputEvent::FormatChanged);
        match queues.dequeue_output().unwrap() {
            OutputEvent::Buffer { index, info } => {
                assert_eq!(info.size, 2);
                assert_eq!(queues.output_pool().readable(index, 0, 2).unwrap(), &[1, 2]);
                queues.release_output(index).unwrap();
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(queues.dequeue_output().unwrap(), OutputEvent::TryAgainLater);
    }

    #[test]
    fn test_oversize_unit_grows_pool() {
        let mut queues = started(4);
        queues.push_ready(ReadyUnit {
            data: vec![7; 10],
            pts_us: 5,
            flags: BufferFlags::NONE,
        });
        assert_eq!(queues.dequeue_output().unwrap(), OutputEvent::BuffersChanged);
        assert_eq!(queues.output_pool().generation(), 1);
        assert_eq!(queues.output_pool().capacity(0), Some(16));
        assert!(matches!(
            queues.dequeue_output().unwrap(),
            OutputEvent::Buffer { .. }
        ));
    }

    #[test]
    fn test_stop_and_restart() {
        let mut queues = started(8);
        queues.dequeue_input().unwrap();
        queues.stop().unwrap();
        assert!(queues.dequeue_input().is_err());
        queues.start().unwrap();
        assert_eq!(queues.dequeue_input().unwrap(), Some(0));
    }
}
