//! Concurrent append pipeline
//!
//! Producers submit [`StorageTransaction`](crate::transaction::StorageTransaction)s
//! through a [`TransactionLogQueue`]. Submissions travel through a lock-free
//! [`MpscAppendQueue`] to a single appender thread, which assigns append
//! indexes, writes the log and makes each drained batch durable before
//! waking the waiting producers.

mod appender;
mod element;
mod idle;
mod log_queue;
mod queue;
mod stats;

pub use element::{NotifyMode, QueueElement};
pub use idle::{
    IdleAction, IdleConfig, SpinParkIdleStrategy, DEFAULT_LONG_PARK, DEFAULT_SHORT_PARK,
    DEFAULT_SHORT_PARK_THRESHOLD, DEFAULT_SPIN_THRESHOLD,
};
pub use log_queue::{
    LogQueueConfig, LogQueueOptions, TransactionLogQueue, DEFAULT_CONSUMER_MAX_BATCH,
};
pub use queue::MpscAppendQueue;
pub use stats::{AppendStats, AppendStatsSnapshot};
