use std::fmt;
use std::marker::PhantomData;
use std::mem::size_of;
use std::path::Path;

use bytemuck::Pod;
use tracing::debug;

use crate::core::{DeletePolicy, QueueConfig, Segment};
use crate::errors::Result;
use crate::{reader, writer};

/// Entry point for opening queues. Holds the configuration every queue it
/// opens shares; there is no process-wide state behind it.
#[derive(Clone, Debug)]
pub struct QueueEngine {
    cfg: QueueConfig,
}

impl QueueEngine {
    pub fn new(cfg: QueueConfig) -> Result<QueueEngine> {
        cfg.validate()?;
        Ok(QueueEngine { cfg })
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<QueueEngine> {
        QueueEngine::new(QueueConfig::load(path)?)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.cfg
    }

    /// Creates the queue for `key` or attaches to a compatible existing one.
    pub fn open<T: Pod>(&self, capacity: u64, key: u32) -> Result<MarketQueue<T>> {
        let segment = Segment::create(&self.cfg, key, capacity, size_of::<T>())?;
        Ok(MarketQueue::new(segment, self.cfg.clone()))
    }

    /// Attaches to an existing queue, taking its capacity from the segment.
    pub fn attach<T: Pod>(&self, key: u32) -> Result<MarketQueue<T>> {
        let segment = Segment::attach(&self.cfg, key, size_of::<T>())?;
        Ok(MarketQueue::new(segment, self.cfg.clone()))
    }

    /// Removes the queue for `key` for every process. Only call this once
    /// no other process needs the queue.
    pub fn destroy(&self, key: u32) -> Result<()> {
        Segment::destroy(&self.cfg, key)
    }
}

/// A handle on one shared queue of `T` records.
///
/// Any number of handles in any number of processes may read; exactly one
/// handle may write. Dropping the handle detaches it.
pub struct MarketQueue<T> {
    segment: Segment,
    cfg: QueueConfig,
    _record: PhantomData<fn() -> T>,
}

impl<T: Pod> MarketQueue<T> {
    fn new(segment: Segment, cfg: QueueConfig) -> MarketQueue<T> {
        MarketQueue {
            segment,
            cfg,
            _record: PhantomData,
        }
    }

    /// Publishes `record` as logical `index`. Overwrites the record at
    /// `index - capacity`, if any.
    #[inline]
    pub fn write(&self, index: u64, record: &T) -> Result<()> {
        writer::publish(&self.segment, index, bytemuck::bytes_of(record))
    }

    #[inline]
    pub fn read(&self, index: u64, out: &mut T) -> Result<()> {
        reader::read_at(&self.segment, index, bytemuck::bytes_of_mut(out))
    }

    /// Reads the latest record and returns its logical index.
    #[inline]
    pub fn read_last(&self, out: &mut T) -> Result<u64> {
        reader::read_latest(&self.segment, bytemuck::bytes_of_mut(out))
    }

    pub fn get(&self, index: u64) -> Result<T> {
        let mut out = T::zeroed();
        self.read(index, &mut out)?;
        Ok(out)
    }

    pub fn last(&self) -> Result<(u64, T)> {
        let mut out = T::zeroed();
        let index = self.read_last(&mut out)?;
        Ok((index, out))
    }
}

impl<T> MarketQueue<T> {
    /// Highest published index, `None` if nothing was published yet.
    pub fn last_index(&self) -> Option<u64> {
        u64::try_from(self.segment.cursor()).ok()
    }

    pub fn capacity(&self) -> u64 {
        self.segment.layout().capacity()
    }

    pub fn record_size(&self) -> usize {
        self.segment.layout().record_size() as usize
    }

    pub fn key(&self) -> u32 {
        self.segment.key()
    }

    pub fn delete_policy(&self) -> DeletePolicy {
        self.cfg.delete_policy
    }

    pub fn detach(self) {
        self.segment.detach()
    }

    /// Releases this handle according to the configured [`DeletePolicy`].
    pub fn delete(self) -> Result<()> {
        let MarketQueue { segment, cfg, .. } = self;
        let key = segment.key();
        segment.detach();
        match cfg.delete_policy {
            DeletePolicy::Detach => Ok(()),
            DeletePolicy::Destroy => {
                debug!("delete policy destroys queue 0x{:08X}", key);
                Segment::destroy(&cfg, key)
            }
        }
    }
}

impl<T> fmt::Debug for MarketQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarketQueue")
            .field("segment", &self.segment)
            .field("delete_policy", &self.cfg.delete_policy)
            .finish()
    }
}
