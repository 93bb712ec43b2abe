//! oxilog - A durable, ordered, concurrent transaction log
//!
//! Many producer threads submit transactions; one appender thread writes
//! them to a segmented, checksummed log in drained batches and makes every
//! batch durable before the producers are woken.
//!
//! # Features
//!
//! - Lock-free multi-producer submission queue
//! - Gap-free, strictly increasing append indexes
//! - One force (or rotation) per drained batch
//! - Batch-atomic failure delivery and a sticky database panic signal
//! - Checksum chain across entries and segments, verified on read and reopen
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use oxilog::prelude::*;
//!
//! let store = Arc::new(DirectoryStore::new("/var/lib/oxilog")?);
//! let queue = TransactionLogQueue::open(store, &LogQueueOptions::default())?;
//! queue.start()?;
//!
//! let element = queue.submit(StorageTransaction::single(42, vec![b"put k v".to_vec()]))?;
//! let append_index = element.committed_append_index()?;
//!
//! queue.shutdown();
//! ```

#![warn(missing_docs)]

pub mod append_index;
pub mod config;
pub mod device;
pub mod error;
pub mod health;
pub mod log;
pub mod metadata;
pub mod pipeline;
pub mod position;
pub mod transaction;

// Re-exports for convenience
pub use append_index::{AppendIndex, AppendIndexAllocator};
pub use error::{AppendError, ErrorKind, Result};
pub use position::LogPosition;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::append_index::AppendIndex;
    pub use crate::device::{DirectoryStore, MemoryStore, SegmentStore};
    pub use crate::error::{AppendError, Result};
    pub use crate::pipeline::{LogQueueOptions, QueueElement, TransactionLogQueue};
    pub use crate::position::LogPosition;
    pub use crate::transaction::{CommandChunk, StorageTransaction};
}
