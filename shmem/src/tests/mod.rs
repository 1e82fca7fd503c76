use std::process;
use std::sync::atomic::{AtomicU32, Ordering};

use bytemuck::{Pod, Zeroable};

use crate::core::{QueueConfig, Segment};
use crate::queue::QueueEngine;


static QUEUE_ID_COUNTER: AtomicU32 = AtomicU32::new(1);

/// A queue namespace private to one test. Destroys its segment on drop.
pub(crate) struct TestQueue {
    pub cfg: QueueConfig,
    pub key: u32,
}

impl TestQueue {
    pub fn new() -> TestQueue {
        let id = QUEUE_ID_COUNTER.fetch_add(1, Ordering::SeqCst);
        TestQueue::with_id(id, id)
    }

    pub fn with_key(key: u32) -> TestQueue {
        let id = QUEUE_ID_COUNTER.fetch_add(1, Ordering::SeqCst);
        TestQueue::with_id(id, key)
    }

    fn with_id(id: u32, key: u32) -> TestQueue {
        let cfg = QueueConfig::builder()
            .name_prefix(format!("/mq_test_{}_{}", process::id(), id))
            .attach_timeout_ms(50)
            .build()
            .expect("test config");
        TestQueue { cfg, key }
    }

    pub fn engine(&self) -> QueueEngine {
        QueueEngine::new(self.cfg.clone()).expect("test engine")
    }
}

impl Drop for TestQueue {
    fn drop(&mut self) {
        let _ = Segment::destroy(&self.cfg, self.key);
    }
}

/// 16-byte record for tests that need many slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub(crate) struct SmallTick {
    pub index: u64,
    pub check: u64,
}

impl SmallTick {
    pub fn new(index: u64) -> SmallTick {
        SmallTick {
            index,
            check: !index,
        }
    }
}
