//! Optimistic readers. Nothing here writes to the segment or waits on the
//! publisher: every call finishes after a bounded number of attempts.

use std::hint;
use std::ptr;
use std::sync::atomic::{fence, Ordering};

use crate::core::{Segment, LATEST_RETRY_LIMIT, READ_RETRY_LIMIT};
use crate::errors::{QueueError, Result};

/// Copies the record published as logical `index` into `out`.
///
/// `out` must be exactly one record long. Its contents are unspecified when
/// an error is returned.
pub fn read_at(segment: &Segment, index: u64, out: &mut [u8]) -> Result<()> {
    let cursor = segment.cursor();
    if cursor < 0 || index > cursor as u64 {
        return Err(QueueError::NotYetWritten { index, cursor });
    }
    if index.saturating_add(segment.layout().capacity()) <= cursor as u64 {
        return Err(QueueError::Evicted { index, cursor });
    }

    let slot = segment.slot(index);
    if out.len() != slot.record_size {
        return Err(QueueError::LayoutMismatch {
            key: segment.key(),
            expected: slot.record_size as u32,
            found: out.len() as u32,
        });
    }
    let wanted = index as i64;
    for _ in 0..READ_RETRY_LIMIT {
        let before = slot.header.seq.load(Ordering::Acquire);
        if before & 1 == 0 {
            let stored = slot.header.index.load(Ordering::Relaxed);
            if stored == wanted {
                unsafe {
                    ptr::copy_nonoverlapping(slot.record as *const u8, out.as_mut_ptr(), slot.record_size);
                }
            }
            fence(Ordering::Acquire);
            if slot.header.seq.load(Ordering::Relaxed) == before {
                return if stored == wanted {
                    Ok(())
                } else if stored > wanted {
                    Err(QueueError::Evicted {
                        index,
                        cursor: segment.cursor(),
                    })
                } else {
                    // The producer skipped this index.
                    Err(QueueError::NotYetWritten { index, cursor })
                };
            }
        }
        hint::spin_loop();
    }
    Err(QueueError::TornRead { index })
}

/// Copies the most recently published record into `out` and returns its
/// logical index.
pub fn read_latest(segment: &Segment, out: &mut [u8]) -> Result<u64> {
    for _ in 0..LATEST_RETRY_LIMIT {
        let cursor = segment.cursor();
        if cursor < 0 {
            return Err(QueueError::Empty);
        }
        match read_at(segment, cursor as u64, out) {
            Ok(()) => return Ok(cursor as u64),
            // the publisher lapped us, look again
            Err(QueueError::Evicted { .. }) | Err(QueueError::TornRead { .. }) => continue,
            Err(e) => return Err(e),
        }
    }
    Err(QueueError::Unavailable)
}
