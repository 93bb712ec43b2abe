//! Segmented transaction log
//!
//! The log is a chain of segments, each starting with a [`SegmentHeader`]
//! followed by checksummed entries, one per appended command chunk.
//!
//! # Overview
//!
//! - [`LogFile`]: the active segment, its write buffer and append point
//! - [`TransactionLogWriter`]: encodes chunks and continues the checksum chain
//! - [`LogRotation`]: seals segments according to a [`RotationPolicy`]
//! - [`LogReader`]: verified random access and scans
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use oxilog::device::MemoryStore;
//! use oxilog::log::{LogFile, LogFilesConfig, LogReader, TransactionLogWriter};
//!
//! let store = Arc::new(MemoryStore::new());
//! let file = LogFile::open(store.clone(), LogFilesConfig::default())?;
//! let mut writer = TransactionLogWriter::new(file);
//! // ... append chunks, then force ...
//!
//! for entry in LogReader::new(store).scan_all()? {
//!     println!("{} at {}", entry.append_index, entry.position);
//! }
//! ```

pub(crate) mod format;
mod log_file;
mod reader;
mod rotation;
mod types;
mod writer;

pub use format::{checksum64, FormatError, LogEntry, SegmentHeader};
pub use log_file::LogFile;
pub use reader::{LogReader, LogScanner};
pub use rotation::{
    LogRotation, NeverRotate, RotationPolicy, RotationThreshold, DEFAULT_ROTATION_THRESHOLD_BYTES,
};
pub use types::{
    LogAppendEvent, LogFilesConfig, LogTail, SegmentInfo, BASE_TX_CHECKSUM,
    DEFAULT_WRITE_BUFFER_SIZE,
};
pub use writer::TransactionLogWriter;
