//! Binary layout of a queue segment.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ magic │ version │ record_size │ capacity │ stride │ (pad)     │ 128 B
//! │ write_cursor (cache padded)                                   │ 128 B
//! ├───────────────────────────────────────────────────────────────┤
//! │ slot[0]: seq (u64) │ index (i64) │ record bytes │ (pad to 64) │
//! │ slot[1]                                                       │
//! │ ...                                                           │
//! │ slot[capacity - 1]                                            │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Logical index `i` lives in `slot[i % capacity]`. A slot's `seq` is odd
//! while the publisher is copying into it.

use std::mem::size_of;
use std::sync::atomic::{AtomicI64, AtomicU64};

use crossbeam_utils::CachePadded;

use crate::errors::{QueueError, Result};

/// "MKTQUEUE"
pub const QUEUE_MAGIC: u64 = 0x4D4B_5451_5545_5545;
pub const LAYOUT_VERSION: u32 = 1;

/// Cursor value of a queue nothing has been published to.
pub const EMPTY_CURSOR: i64 = -1;
/// Stored index of a slot that has never held a record.
pub const EMPTY_SLOT: i64 = -1;

pub const MAX_CAPACITY: u64 = u32::MAX as u64 + 1;

const HEADER_ALIGN: usize = 128;
const SLOT_ALIGN: usize = 64;

pub const HEADER_SIZE: usize = round_up(size_of::<QueueHeader>(), HEADER_ALIGN);

#[inline]
const fn round_up(n: usize, align: usize) -> usize {
    (n + align - 1) / align * align
}

/// Control block at offset 0 of every segment.
///
/// Everything but `magic` and `write_cursor` is written once by the creator
/// before `magic` is published and never changes afterwards.
#[repr(C)]
pub struct QueueHeader {
    pub magic: AtomicU64,
    pub layout_version: u32,
    pub record_size: u32,
    pub capacity: u64,
    pub slot_stride: u64,
    /// Highest published logical index, `EMPTY_CURSOR` until the first write.
    pub write_cursor: CachePadded<AtomicI64>,
}

#[repr(C)]
pub struct SlotHeader {
    pub seq: AtomicU64,
    pub index: AtomicI64,
}

const SLOT_HEADER_SIZE: usize = size_of::<SlotHeader>();

/// A slot resolved to its place in the mapping.
pub struct SlotRef<'a> {
    pub header: &'a SlotHeader,
    pub record: *mut u8,
    pub record_size: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    capacity: u64,
    record_size: u32,
    slot_stride: usize,
    total_size: usize,
}

impl Layout {
    pub fn new(capacity: u64, record_size: usize) -> Result<Layout> {
        if capacity == 0 || capacity > MAX_CAPACITY {
            return Err(QueueError::InvalidConfig(format!(
                "capacity must be within 1..={}, got {}",
                MAX_CAPACITY, capacity
            )));
        }
        let record_size_u32 = u32::try_from(record_size)
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| QueueError::InvalidConfig(format!("unsupported record size {}", record_size)))?;
        let slot_stride = round_up(SLOT_HEADER_SIZE + record_size, SLOT_ALIGN);
        let total_size = usize::try_from(capacity)
            .ok()
            .and_then(|c| c.checked_mul(slot_stride))
            .and_then(|slots| slots.checked_add(HEADER_SIZE))
            .ok_or_else(|| {
                QueueError::InvalidConfig(format!(
                    "{} slots of {} bytes do not fit in the address space",
                    capacity, slot_stride
                ))
            })?;
        Ok(Layout {
            capacity,
            record_size: record_size_u32,
            slot_stride,
            total_size,
        })
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[inline]
    pub fn record_size(&self) -> u32 {
        self.record_size
    }

    #[inline]
    pub fn slot_stride(&self) -> usize {
        self.slot_stride
    }

    #[inline]
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Byte offset of the slot holding logical `index`.
    #[inline]
    pub fn slot_offset(&self, index: u64) -> usize {
        HEADER_SIZE + (index % self.capacity) as usize * self.slot_stride
    }

    #[inline]
    pub fn record_offset(&self, index: u64) -> usize {
        self.slot_offset(index) + SLOT_HEADER_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{MarketData, MARKET_DATA_SIZE};

    #[test]
    fn header_is_cache_aligned() {
        assert_eq!(HEADER_SIZE % HEADER_ALIGN, 0);
        assert!(HEADER_SIZE >= size_of::<QueueHeader>());
        assert_eq!(SLOT_HEADER_SIZE, 16);
    }

    #[test]
    fn market_data_layout() -> Result<()> {
        let layout = Layout::new(28801, size_of::<MarketData>())?;
        assert_eq!(layout.record_size() as usize, MARKET_DATA_SIZE);
        assert_eq!(layout.slot_stride(), 4224);
        assert_eq!(layout.total_size(), HEADER_SIZE + 28801 * 4224);
        Ok(())
    }

    #[test]
    fn slots_wrap_around() -> Result<()> {
        let layout = Layout::new(10, 48)?;
        assert_eq!(layout.slot_stride(), 64);
        assert_eq!(layout.slot_offset(0), HEADER_SIZE);
        assert_eq!(layout.slot_offset(3), HEADER_SIZE + 3 * 64);
        assert_eq!(layout.slot_offset(13), layout.slot_offset(3));
        assert_eq!(layout.record_offset(13), HEADER_SIZE + 3 * 64 + 16);
        Ok(())
    }

    #[test]
    fn rejects_degenerate_shapes() {
        assert!(Layout::new(0, 16).is_err());
        assert!(Layout::new(MAX_CAPACITY + 1, 16).is_err());
        assert!(Layout::new(4, 0).is_err());
        assert!(Layout::new(4, u32::MAX as usize + 1).is_err());
    }
}
