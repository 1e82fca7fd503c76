//! Shared-memory ring buffer distributing fixed-size market tick records
//! from one producer process to any number of consumer processes.
//!
//! A queue is identified by an integer key. The producer publishes records
//! under increasing logical indices; readers fetch any index still inside
//! the ring or the latest one, without locks and without ever blocking the
//! producer.

pub mod core;
pub mod errors;
mod queue;
pub mod reader;
pub mod record;
pub mod writer;

#[cfg(test)]
mod tests;

pub use crate::core::{DeletePolicy, QueueConfig, QueueConfigBuilder, Segment};
pub use crate::errors::{QueueError, Result};
pub use crate::queue::{MarketQueue, QueueEngine};
pub use crate::record::{MarketData, MARKET_DATA_SIZE};
