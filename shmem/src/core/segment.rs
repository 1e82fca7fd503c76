use std::fmt;
use std::ptr;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use shared_memory::{Shmem, ShmemConf, ShmemError};
use tracing::{debug, info, trace};

use super::layout::{
    Layout, QueueHeader, SlotHeader, SlotRef, EMPTY_CURSOR, EMPTY_SLOT, HEADER_SIZE, LAYOUT_VERSION,
    QUEUE_MAGIC,
};
use super::QueueConfig;
use crate::errors::{QueueError, Result};

/// One process's mapping of a queue segment.
///
/// Dropping a segment unmaps it and leaves the shared object in place for
/// other attachers; only [`Segment::destroy`] removes it.
pub struct Segment {
    shmem: Shmem,
    key: u32,
    layout: Layout,
}

// Every access to the mapping after initialization goes through atomics or
// the seqlock protocol in the writer and reader modules.
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl Segment {
    /// Creates the segment for `key`, or attaches to it if a compatible one
    /// already exists.
    pub fn create(cfg: &QueueConfig, key: u32, capacity: u64, record_size: usize) -> Result<Segment> {
        let layout = Layout::new(capacity, record_size)?;
        let os_id = cfg.os_id(key);
        match ShmemConf::new().os_id(&os_id).size(layout.total_size()).create() {
            Ok(mut shmem) => {
                // The segment has to survive this handle.
                shmem.set_owner(false);
                let segment = Segment { shmem, key, layout };
                segment.initialize();
                info!(
                    "created queue {} (capacity {}, record size {}, {} bytes)",
                    os_id,
                    capacity,
                    record_size,
                    layout.total_size()
                );
                Ok(segment)
            }
            Err(ShmemError::MappingIdExists) => {
                debug!("queue {} already exists, attaching", os_id);
                let segment = match Segment::attach(cfg, key, record_size) {
                    Ok(v) => v,
                    Err(QueueError::LayoutMismatch { found, .. }) => {
                        return Err(QueueError::AlreadyExists {
                            key,
                            capacity: Segment::peek_capacity(cfg, key).unwrap_or(0),
                            record_size: found,
                        })
                    }
                    Err(e) => return Err(e),
                };
                if segment.layout.capacity() != capacity {
                    return Err(QueueError::AlreadyExists {
                        key,
                        capacity: segment.layout.capacity(),
                        record_size: segment.layout.record_size(),
                    });
                }
                Ok(segment)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Maps an existing segment, waiting up to `attach_timeout_ms` for a
    /// concurrent creator to finish initializing it.
    pub fn attach(cfg: &QueueConfig, key: u32, record_size: usize) -> Result<Segment> {
        let os_id = cfg.os_id(key);
        let deadline = Instant::now() + Duration::from_millis(cfg.attach_timeout_ms);
        loop {
            // A creator that has not sized the object yet shows up as a
            // mapping failure; only a missing object is `NotFound`.
            let shmem = match open(&os_id, key) {
                Ok(v) => Some(v),
                Err(QueueError::SharedMemory(ShmemError::MapOpenFailed(_))) => None,
                Err(e) => return Err(e),
            };
            if let Some(shmem) = shmem.filter(|s| s.len() >= HEADER_SIZE) {
                let header = unsafe { &*(shmem.as_ptr() as *const QueueHeader) };
                if header.magic.load(Ordering::Acquire) == QUEUE_MAGIC {
                    let segment = Segment::from_initialized(shmem, key, record_size)?;
                    info!(
                        "attached queue {} (capacity {}, cursor {})",
                        os_id,
                        segment.layout.capacity(),
                        segment.cursor()
                    );
                    return Ok(segment);
                }
            }
            if Instant::now() >= deadline {
                return Err(QueueError::NotInitialized { key });
            }
            trace!("queue {} is not initialized yet", os_id);
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Unmaps this process's view. The shared object stays.
    pub fn detach(self) {
        debug!("detached queue {}", self.shmem.get_os_id());
    }

    /// Removes the shared object for `key`. Processes still attached keep
    /// their mapping, but nobody can attach to it again.
    pub fn destroy(cfg: &QueueConfig, key: u32) -> Result<()> {
        let os_id = cfg.os_id(key);
        let mut shmem = open(&os_id, key)?;
        shmem.set_owner(true);
        drop(shmem);
        info!("destroyed queue {}", os_id);
        Ok(())
    }

    #[inline]
    pub fn key(&self) -> u32 {
        self.key
    }

    #[inline]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    #[inline]
    pub fn header(&self) -> &QueueHeader {
        unsafe { &*(self.shmem.as_ptr() as *const QueueHeader) }
    }

    /// Current write cursor, `EMPTY_CURSOR` if nothing was published.
    #[inline]
    pub fn cursor(&self) -> i64 {
        self.header().write_cursor.load(Ordering::Acquire)
    }

    #[inline]
    pub fn slot(&self, index: u64) -> SlotRef<'_> {
        unsafe {
            let base = self.shmem.as_ptr();
            let header = &*(base.add(self.layout.slot_offset(index)) as *const SlotHeader);
            SlotRef {
                header,
                record: base.add(self.layout.record_offset(index)),
                record_size: self.layout.record_size() as usize,
            }
        }
    }

    fn initialize(&self) {
        let header = self.shmem.as_ptr() as *mut QueueHeader;
        unsafe {
            ptr::addr_of_mut!((*header).layout_version).write(LAYOUT_VERSION);
            ptr::addr_of_mut!((*header).record_size).write(self.layout.record_size());
            ptr::addr_of_mut!((*header).capacity).write(self.layout.capacity());
            ptr::addr_of_mut!((*header).slot_stride).write(self.layout.slot_stride() as u64);
        }
        let header = self.header();
        header.write_cursor.store(EMPTY_CURSOR, Ordering::Relaxed);
        // Touches every slot, so the whole segment is faulted in before the first publish.
        for i in 0..self.layout.capacity() {
            let slot = self.slot(i);
            slot.header.seq.store(0, Ordering::Relaxed);
            slot.header.index.store(EMPTY_SLOT, Ordering::Relaxed);
        }
        header.magic.store(QUEUE_MAGIC, Ordering::Release);
    }

    fn from_initialized(shmem: Shmem, key: u32, record_size: usize) -> Result<Segment> {
        let header = unsafe { &*(shmem.as_ptr() as *const QueueHeader) };
        if header.layout_version != LAYOUT_VERSION {
            return Err(QueueError::InvalidConfig(format!(
                "queue 0x{:08X} uses layout version {}, expected {}",
                key, header.layout_version, LAYOUT_VERSION
            )));
        }
        if header.record_size as usize != record_size {
            return Err(QueueError::LayoutMismatch {
                key,
                expected: record_size as u32,
                found: header.record_size,
            });
        }
        let layout = Layout::new(header.capacity, record_size)?;
        if layout.slot_stride() as u64 != header.slot_stride || shmem.len() < layout.total_size() {
            return Err(QueueError::InvalidConfig(format!(
                "queue 0x{:08X} is {} bytes, its header describes {}",
                key,
                shmem.len(),
                layout.total_size()
            )));
        }
        Ok(Segment { shmem, key, layout })
    }

    fn peek_capacity(cfg: &QueueConfig, key: u32) -> Option<u64> {
        let shmem = open(&cfg.os_id(key), key).ok()?;
        if shmem.len() < HEADER_SIZE {
            return None;
        }
        let header = unsafe { &*(shmem.as_ptr() as *const QueueHeader) };
        if header.magic.load(Ordering::Acquire) != QUEUE_MAGIC {
            return None;
        }
        Some(header.capacity)
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("os_id", &self.shmem.get_os_id())
            .field("key", &format_args!("0x{:08X}", self.key))
            .field("layout", &self.layout)
            .field("cursor", &self.cursor())
            .finish()
    }
}

fn open(os_id: &str, key: u32) -> Result<Shmem> {
    match ShmemConf::new().os_id(os_id).open() {
        Ok(v) => Ok(v),
        Err(ShmemError::MapOpenFailed(code)) if code == libc::ENOENT as u32 => {
            Err(QueueError::NotFound { key })
        }
        Err(e) => Err(e.into()),
    }
}
