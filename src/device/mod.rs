//! Storage device abstraction for log segments
//!
//! This module provides traits and implementations for the devices the
//! transaction log writes its segments to.

mod file_device;
mod memory_device;
mod traits;

pub use file_device::{DirectoryStore, FileSystemFile, DEFAULT_SEGMENT_PREFIX};
pub use memory_device::{MemoryFile, MemoryStore};
pub use traits::{SegmentStore, StorageDevice};
