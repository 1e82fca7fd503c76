use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Shared memory error: {0}")]
    SharedMemory(#[from] shared_memory::ShmemError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Queue 0x{key:08X} does not exist")]
    NotFound { key: u32 },
    #[error("Queue 0x{key:08X} already exists with capacity {capacity} and record size {record_size}")]
    AlreadyExists {
        key: u32,
        capacity: u64,
        record_size: u32,
    },
    #[error("Queue 0x{key:08X} holds {found}-byte records, expected {expected}")]
    LayoutMismatch {
        key: u32,
        expected: u32,
        found: u32,
    },
    #[error("Queue 0x{key:08X} was not initialized by its creator in time")]
    NotInitialized { key: u32 },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Index {index} is out of range")]
    IndexOutOfRange { index: u64 },
    #[error("Index {index} has not been written yet (cursor {cursor})")]
    NotYetWritten { index: u64, cursor: i64 },
    #[error("Index {index} has been evicted (cursor {cursor})")]
    Evicted { index: u64, cursor: i64 },
    #[error("Index {index} kept changing while being read")]
    TornRead { index: u64 },
    #[error("No stable latest record under contention")]
    Unavailable,
    #[error("Queue is empty")]
    Empty,
}

impl QueueError {
    /// Errors raised while creating or attaching a segment.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            QueueError::SharedMemory(_)
                | QueueError::Io(_)
                | QueueError::NotFound { .. }
                | QueueError::AlreadyExists { .. }
                | QueueError::LayoutMismatch { .. }
                | QueueError::NotInitialized { .. }
                | QueueError::InvalidConfig(_)
        )
    }

    /// Outcomes a caller can simply try again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueueError::TornRead { .. } | QueueError::Unavailable | QueueError::NotYetWritten { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(QueueError::NotFound { key: 1 }.is_configuration_error());
        assert!(QueueError::InvalidConfig("x".into()).is_configuration_error());
        assert!(!QueueError::Empty.is_configuration_error());
        assert!(QueueError::TornRead { index: 3 }.is_retryable());
        assert!(QueueError::Unavailable.is_retryable());
        assert!(!QueueError::Evicted { index: 0, cursor: 20 }.is_retryable());
    }

    #[test]
    fn display_renders_key_in_hex() {
        let e = QueueError::NotFound { key: 0xFF00_0003 };
        assert_eq!(e.to_string(), "Queue 0xFF000003 does not exist");
    }
}
