//! Shared types for the log layer.

use std::fmt;
use std::time::Duration;

use crate::append_index::AppendIndex;
use crate::position::LogPosition;

/// Default size of the write buffer in front of the active segment.
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 256 * 1024;

/// Checksum that seeds the chain of a brand new log.
pub const BASE_TX_CHECKSUM: u64 = 0x4F58_4C4F_4700_0001;

/// Configuration for the segmented log files
#[derive(Debug, Clone)]
pub struct LogFilesConfig {
    /// Bytes staged in memory before they are written to the segment
    pub write_buffer_size: usize,
    /// Checksum seeding the chain of an empty log
    pub initial_checksum: u64,
}

impl Default for LogFilesConfig {
    fn default() -> Self {
        Self {
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            initial_checksum: BASE_TX_CHECKSUM,
        }
    }
}

impl LogFilesConfig {
    /// Set the write buffer size
    pub fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    /// Set the checksum seeding a new log
    pub fn with_initial_checksum(mut self, checksum: u64) -> Self {
        self.initial_checksum = checksum;
        self
    }
}

/// Append point of the log: what the next entry continues from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogTail {
    /// Last append index written to the log
    pub last_append_index: AppendIndex,
    /// Running checksum after the last entry
    pub checksum: u64,
    /// Position where the next entry goes
    pub position: LogPosition,
}

/// Snapshot of the active segment, consulted by rotation policies.
#[derive(Debug, Clone, Copy)]
pub struct SegmentInfo {
    /// Version of the active segment
    pub log_version: u64,
    /// Bytes in the segment, including buffered bytes
    pub size: u64,
    /// Time since the segment was opened by this process
    pub age: Duration,
}

/// Per-batch record of what the appender did.
#[derive(Debug, Clone, Default)]
pub struct LogAppendEvent {
    /// Queue elements in the batch
    pub batch_size: usize,
    /// Command chunks written
    pub chunks: usize,
    /// Bytes appended to the log
    pub appended_bytes: u64,
    /// Whether the batch triggered a rotation
    pub log_rotated: bool,
    /// Whether the batch was explicitly forced
    pub forced: bool,
}

impl LogAppendEvent {
    /// Start an event for a drained batch of `batch_size` elements
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            ..Self::default()
        }
    }
}

impl fmt::Display for LogAppendEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch={} chunks={} bytes={} rotated={} forced={}",
            self.batch_size, self.chunks, self.appended_bytes, self.log_rotated, self.forced
        )
    }
}
