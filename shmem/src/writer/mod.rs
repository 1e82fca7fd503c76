//! Single-writer publish protocol.
//!
//! 1. Set the slot's `seq` to an odd value: the slot is in flight.
//! 2. Store the logical index and copy the record bytes.
//! 3. Bump `seq` to the next even value with release ordering.
//! 4. Raise the write cursor to `index` with release ordering.
//!
//! A reader that sees the new cursor therefore sees the finished slot, and a
//! reader that raced the copy sees `seq` change under it.

use std::ptr;
use std::sync::atomic::{fence, Ordering};

use crate::core::Segment;
use crate::errors::{QueueError, Result};

/// Publishes `record` as logical `index`, evicting whatever the slot held.
///
/// Only one thread in one process may publish to a segment at a time.
/// Indices are expected to increase; the cursor never moves backwards even
/// if they do not.
pub fn publish(segment: &Segment, index: u64, record: &[u8]) -> Result<()> {
    let stored = i64::try_from(index).map_err(|_| QueueError::IndexOutOfRange { index })?;
    let slot = segment.slot(index);
    if record.len() != slot.record_size {
        return Err(QueueError::LayoutMismatch {
            key: segment.key(),
            expected: slot.record_size as u32,
            found: record.len() as u32,
        });
    }

    // Odd from here on, even if a publish that died half way left it odd.
    let seq = slot.header.seq.load(Ordering::Relaxed) | 1;
    slot.header.seq.store(seq, Ordering::Relaxed);
    fence(Ordering::Release);

    slot.header.index.store(stored, Ordering::Relaxed);
    unsafe {
        ptr::copy_nonoverlapping(record.as_ptr(), slot.record, slot.record_size);
    }

    slot.header.seq.store(seq.wrapping_add(1), Ordering::Release);
    segment
        .header()
        .write_cursor
        .fetch_max(stored, Ordering::Release);
    Ok(())
}
