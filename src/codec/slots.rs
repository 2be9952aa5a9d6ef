//! Index-addressed buffer pools shared between a codec and its driver
//!
//! A slot belongs either to the codec or to the driver. The codec hands a slot
//! out with [`SlotPool::lend`]; the driver gives it back with
//! [`SlotPool::reclaim`]. Touching a slot the driver does not hold is an
//! `IllegalSessionState`.

use crate::error::{PumpError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owner {
    Codec,
    Driver,
}

#[derive(Debug)]
struct Slot {
    data: Vec<u8>,
    owner: Owner,
}

/// A replaceable array of equally sized buffers
#[derive(Debug)]
pub struct SlotPool {
    slots: Vec<Slot>,
    generation: u64,
}

impl SlotPool {
    pub fn new(count: usize, capacity: usize) -> Self {
        Self {
            slots: Self::allocate(count, capacity),
            generation: 0,
        }
    }

    fn allocate(count: usize, capacity: usize) -> Vec<Slot> {
        (0..count)
            .map(|_| Slot {
                data: vec![0u8; capacity],
                owner: Owner::Codec,
            })
            .collect()
    }

    /// Swap the whole pool for a fresh one and bump the generation.
    ///
    /// Any slot the driver still holds is invalidated with it.
    pub fn replace(&mut self, count: usize, capacity: usize) {
        self.slots = Self::allocate(count, capacity);
        self.generation += 1;
    }

    /// Incremented on every [`replace`](Self::replace)
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Capacity of slot `index`.
    pub fn capacity(&self, index: usize) -> Option<usize> {
        self.slots.get(index).map(|s| s.data.len())
    }

    /// Lowest-numbered slot the codec currently holds.
    pub fn first_free(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.owner == Owner::Codec)
    }

    /// Number of slots held by the driver.
    pub fn lent(&self) -> usize {
        self.slots.iter().filter(|s| s.owner == Owner::Driver).count()
    }

    /// Codec side: hand slot `index` to the driver.
    pub fn lend(&mut self, index: usize) -> Result<()> {
        let slot = self.slot_mut(index)?;
        if slot.owner != Owner::Codec {
            return Err(PumpError::IllegalSessionState {
                operation: "lend slot",
                state: format!("slot {} already held by the driver", index),
            });
        }
        slot.owner = Owner::Driver;
        Ok(())
    }

    /// Driver side: give slot `index` back to the codec.
    pub fn reclaim(&mut self, index: usize) -> Result<()> {
        let slot = self.driver_slot_mut(index, "return slot")?;
        slot.owner = Owner::Codec;
        Ok(())
    }

    /// Codec side: mutable access to a slot it holds (to fill output).
    pub fn codec_buffer_mut(&mut self, index: usize) -> Result<&mut Vec<u8>> {
        let slot = self.slot_mut(index)?;
        if slot.owner != Owner::Codec {
            return Err(PumpError::IllegalSessionState {
                operation: "fill slot",
                state: format!("slot {} is held by the driver", index),
            });
        }
        Ok(&mut slot.data)
    }

    /// Codec side: read a slot the driver has just handed back.
    pub fn codec_buffer(&self, index: usize) -> Result<&[u8]> {
        let slot = self.slot(index)?;
        if slot.owner != Owner::Codec {
            return Err(PumpError::IllegalSessionState {
                operation: "read slot",
                state: format!("slot {} is held by the driver", index),
            });
        }
        Ok(&slot.data)
    }

    /// Driver side: the whole writable range of a held slot.
    pub fn writable(&mut self, index: usize) -> Result<&mut [u8]> {
        let slot = self.driver_slot_mut(index, "write slot")?;
        Ok(&mut slot.data[..])
    }

    /// Driver side: `size` readable bytes at `offset` of a held slot.
    pub fn readable(&self, index: usize, offset: usize, size: usize) -> Result<&[u8]> {
        let slot = self.slot(index)?;
        if slot.owner != Owner::Driver {
            return Err(PumpError::IllegalSessionState {
                operation: "read slot",
                state: format!("slot {} is held by the codec", index),
            });
        }
        let end = offset
            .checked_add(size)
            .filter(|&end| end <= slot.data.len())
            .ok_or_else(|| PumpError::IllegalSessionState {
                operation: "read slot",
                state: format!(
                    "range {}+{} outside slot {} of {} bytes",
                    offset,
                    size,
                    index,
                    slot.data.len()
                ),
            })?;
        Ok(&slot.data[offset..end])
    }

    fn slot(&self, index: usize) -> Result<&Slot> {
        let len = self.slots.len();
        self.slots.get(index).ok_or_else(|| PumpError::IllegalSessionState {
            operation: "index slot",
            state: format!("index {} outside pool of {} slots", index, len),
        })
    }

    fn slot_mut(&mut self, index: usize) -> Result<&mut Slot> {
        let len = self.slots.len();
        self.slots
            .get_mut(index)
            .ok_or_else(|| PumpError::IllegalSessionState {
                operation: "index slot",
                state: format!("index {} outside pool of {} slots", index, len),
            })
    }

    fn driver_slot_mut(&mut self, index: usize, operation: &'static str) -> Result<&mut Slot> {
        let slot = self.slot_mut(index)?;
        if slot.owner != Owner::Driver {
            return Err(PumpError::IllegalSessionState {
                operation,
                state: format!("slot {} is held by the codec", index),
            });
        }
        Ok(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lend_and_reclaim() {
        let mut pool = SlotPool::new(2, 16);
        assert_eq!(pool.first_free(), Some(0));
        pool.lend(0).unwrap();
        assert_eq!(pool.first_free(), Some(1));
        assert_eq!(pool.lent(), 1);

        pool.writable(0).unwrap()[0] = 42;
        pool.reclaim(0).unwrap();
        assert_eq!(pool.codec_buffer(0).unwrap()[0], 42);
        assert_eq!(pool.lent(), 0);
    }

    #[test]
    fn test_driver_cannot_touch_codec_slot() {
        let mut pool = SlotPool::new(1, 8);
        assert!(pool.writable(0).is_err());
        assert!(pool.readable(0, 0, 4).is_err());
        assert!(pool.reclaim(0).is_err());
    }

    #[test]
    fn test_double_lend_fails() {
        let mut pool = SlotPool::new(1, 8);
        pool.lend(0).unwrap();
        assert!(pool.lend(0).is_err());
        assert!(pool.codec_buffer_mut(0).is_err());
    }

    #[test]
    fn test_readable_range_is_checked() {
        let mut pool = SlotPool::new(1, 8);
        pool.lend(0).unwrap();
        assert_eq!(pool.readable(0, 2, 6).unwrap().len(), 6);
        assert!(pool.readable(0, 4, 6).is_err());
        assert!(pool.readable(0, usize::MAX, 2).is_err());
    }

    #[test]
    fn test_replace_invalidates_lent_slots() {
        let mut pool = SlotPool::new(2, 8);
        pool.lend(1).unwrap();
        pool.replace(3, 32);
        assert_eq!(pool.generation(), 1);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.capacity(2), Some(32));
        assert!(pool.reclaim(1).is_err());
    }

    #[test]
    fn test_out_of_range_index() {
        let mut pool = SlotPool::new(1, 8);
        assert!(pool.lend(5).is_err());
        assert_eq!(pool.capacity(5), None);
    }
}
