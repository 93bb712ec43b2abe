//! Active log segment with a write buffer.
//!
//! `LogFile` owns the device of the newest segment and is only ever touched
//! by the appender thread. Bytes are staged in memory and written to the
//! device when the buffer fills up, on [`force`](LogFile::force) and before
//! a rotation.

use std::sync::Arc;
use std::time::Instant;

use crate::append_index::AppendIndex;
use crate::device::{SegmentStore, StorageDevice};
use crate::error::{AppendError, Result};
use crate::log::format::SegmentHeader;
use crate::log::reader::{read_entry_at, read_segment_header, EntryRead};
use crate::log::types::{LogFilesConfig, LogTail, SegmentInfo};
use crate::position::LogPosition;

/// The segment currently being appended to.
pub struct LogFile<S: SegmentStore> {
    store: Arc<S>,
    config: LogFilesConfig,
    version: u64,
    device: S::Device,
    /// Bytes of the segment already handed to the device.
    flushed: u64,
    buffer: Vec<u8>,
    opened_at: Instant,
    tail: LogTail,
}

impl<S: SegmentStore> LogFile<S> {
    /// Open the newest segment of `store`, or create segment 0 for an empty
    /// store.
    ///
    /// The newest segment is scanned to find the append point. A torn or
    /// corrupt tail is truncated away; the checksum chain up to that point
    /// must verify.
    pub fn open(store: Arc<S>, config: LogFilesConfig) -> Result<Self> {
        let versions = store.list_segments()?;
        let Some(&last) = versions.last() else {
            let tail = LogTail {
                last_append_index: AppendIndex::BASE,
                checksum: config.initial_checksum,
                position: LogPosition::new(0, SegmentHeader::SIZE as u64),
            };
            let device = create_segment(store.as_ref(), 0, &tail)?;
            tracing::info!(log_version = 0, "created new transaction log");
            return Ok(Self::from_parts(store, config, device, tail));
        };

        let device = store.open_segment(last, false)?;
        let tail = if device.size_sync()? < SegmentHeader::SIZE as u64 {
            // Crashed while creating the segment: rebuild its header from the
            // previous segment's tail.
            let carried = match versions.len().checked_sub(2).map(|i| versions[i]) {
                Some(previous) => {
                    let previous_device = store.open_segment(previous, false)?;
                    let tail = recover_segment(&previous_device, previous)?;
                    LogTail {
                        position: LogPosition::new(last, SegmentHeader::SIZE as u64),
                        ..tail
                    }
                }
                None => LogTail {
                    last_append_index: AppendIndex::BASE,
                    checksum: config.initial_checksum,
                    position: LogPosition::new(last, SegmentHeader::SIZE as u64),
                },
            };
            tracing::warn!(log_version = last, "rewriting incomplete segment header");
            device.truncate_sync(0)?;
            write_segment_header(&device, last, &carried)?;
            carried
        } else {
            recover_segment(&device, last)?
        };

        tracing::info!(
            log_version = last,
            last_append_index = %tail.last_append_index,
            position = %tail.position,
            "opened transaction log"
        );
        Ok(Self::from_parts(store, config, device, tail))
    }

    fn from_parts(store: Arc<S>, config: LogFilesConfig, device: S::Device, tail: LogTail) -> Self {
        let buffer = Vec::with_capacity(config.write_buffer_size);
        Self {
            store,
            config,
            version: tail.position.log_version(),
            device,
            flushed: tail.position.byte_offset(),
            buffer,
            opened_at: Instant::now(),
            tail,
        }
    }

    /// Version of the active segment
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Position where the next byte goes
    pub fn position(&self) -> LogPosition {
        LogPosition::new(self.version, self.flushed + self.buffer.len() as u64)
    }

    /// Last recorded append point
    pub fn tail(&self) -> LogTail {
        self.tail
    }

    /// Stage `bytes` at the current position.
    pub fn append_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(bytes);
        if self.buffer.len() >= self.config.write_buffer_size {
            self.flush_buffer()?;
        }
        Ok(())
    }

    /// Record that the entry ending at the current position carries
    /// `append_index` and leaves the running checksum at `checksum`.
    pub fn record_append(&mut self, append_index: AppendIndex, checksum: u64) {
        self.tail = LogTail {
            last_append_index: append_index,
            checksum,
            position: self.position(),
        };
    }

    fn flush_buffer(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.device.write_all_sync(self.flushed, &self.buffer)?;
        self.flushed += self.buffer.len() as u64;
        self.buffer.clear();
        Ok(())
    }

    /// Write staged bytes and flush the segment to stable storage.
    pub fn force(&mut self) -> Result<()> {
        self.flush_buffer()?;
        self.device.flush_sync()?;
        Ok(())
    }

    /// Seal the active segment and continue in a new one.
    ///
    /// Returns the version of the new segment.
    pub fn rotate(&mut self) -> Result<u64> {
        self.force()?;
        let next = self.version + 1;
        let tail = LogTail {
            position: LogPosition::new(next, SegmentHeader::SIZE as u64),
            ..self.tail
        };
        let device = create_segment(self.store.as_ref(), next, &tail)?;

        self.device = device;
        self.version = next;
        self.flushed = SegmentHeader::SIZE as u64;
        self.opened_at = Instant::now();
        self.tail = tail;
        Ok(next)
    }

    /// Discard everything written after `tail` and make it the append point
    /// again.
    ///
    /// Only bytes of the active segment can be discarded.
    pub fn rollback_to(&mut self, tail: LogTail) -> Result<()> {
        if tail.position.log_version() != self.version {
            return Err(AppendError::InvalidState(
                "cannot roll back across a segment boundary",
            ));
        }
        let offset = tail.position.byte_offset();
        if offset >= self.flushed {
            self.buffer.truncate((offset - self.flushed) as usize);
            // A failed spill can leave part of the buffer past `flushed`.
            if self.device.size_sync()? > self.flushed {
                self.device.truncate_sync(self.flushed)?;
                self.device.flush_sync()?;
            }
        } else {
            self.buffer.clear();
            self.device.truncate_sync(offset)?;
            self.device.flush_sync()?;
            self.flushed = offset;
        }
        self.tail = tail;
        Ok(())
    }

    /// Size and age of the active segment
    pub fn segment_info(&self) -> SegmentInfo {
        SegmentInfo {
            log_version: self.version,
            size: self.position().byte_offset(),
            age: self.opened_at.elapsed(),
        }
    }

    /// Force outstanding bytes before the file is dropped.
    pub fn close(&mut self) -> Result<()> {
        self.force()
    }
}

fn write_segment_header<D: StorageDevice>(device: &D, version: u64, tail: &LogTail) -> Result<()> {
    let mut buf = [0u8; SegmentHeader::SIZE];
    SegmentHeader::new(version, tail.checksum, tail.last_append_index)
        .encode(&mut buf)
        .map_err(|e| AppendError::corruption(LogPosition::new(version, 0), e.to_string()))?;
    device.write_all_sync(0, &buf)?;
    device.flush_sync()?;
    Ok(())
}

fn create_segment<S: SegmentStore>(store: &S, version: u64, tail: &LogTail) -> Result<S::Device> {
    let device = store.open_segment(version, true)?;
    device.truncate_sync(0)?;
    write_segment_header(&device, version, tail)?;
    store.sync_directory()?;
    Ok(device)
}

/// Scan a segment to its last valid entry, truncating anything after it.
fn recover_segment<D: StorageDevice>(device: &D, version: u64) -> Result<LogTail> {
    let header = read_segment_header(device, version)?;
    let mut tail = LogTail {
        last_append_index: header.last_append_index,
        checksum: header.previous_checksum,
        position: LogPosition::new(version, SegmentHeader::SIZE as u64),
    };

    loop {
        match read_entry_at(device, tail.position)? {
            EntryRead::Entry(entry) => {
                if entry.previous_checksum != tail.checksum
                    || entry.append_index <= tail.last_append_index
                {
                    tracing::warn!(
                        position = %entry.position,
                        "entry does not continue the log, treating it as torn"
                    );
                    break;
                }
                tail = LogTail {
                    last_append_index: entry.append_index,
                    checksum: entry.checksum,
                    position: entry.end_position(),
                };
            }
            EntryRead::End => break,
            EntryRead::Invalid(err) => {
                tracing::warn!(position = %tail.position, error = %err, "torn log tail");
                break;
            }
        }
    }

    let size = device.size_sync()?;
    if size > tail.position.byte_offset() {
        tracing::warn!(
            log_version = version,
            from = size,
            to = tail.position.byte_offset(),
            "truncating log tail"
        );
        device.truncate_sync(tail.position.byte_offset())?;
        device.flush_sync()?;
    }
    Ok(tail)
}
