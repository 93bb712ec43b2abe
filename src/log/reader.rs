//! Reading entries back from the log.
//!
//! Readers open their own segment handles; they never share the appender's
//! device. Every entry is verified against its checksum, and scans also
//! verify that the checksum chain is unbroken.

use std::sync::Arc;

use crate::append_index::AppendIndex;
use crate::device::{SegmentStore, StorageDevice};
use crate::error::{AppendError, Result};
use crate::log::format::{decode_payload, EntryHeader, LogEntry, SegmentHeader};
use crate::metadata::MetadataCache;
use crate::position::LogPosition;

/// Outcome of reading at a position.
pub(crate) enum EntryRead {
    /// A complete, checksum-valid entry.
    Entry(LogEntry),
    /// Clean end of the segment.
    End,
    /// Bytes are present but do not form a valid entry.
    Invalid(AppendError),
}

pub(crate) fn read_segment_header<D: StorageDevice>(
    device: &D,
    log_version: u64,
) -> Result<SegmentHeader> {
    let mut buf = [0u8; SegmentHeader::SIZE];
    let read = device.read_full_sync(0, &mut buf)?;
    let position = LogPosition::new(log_version, 0);
    if read < SegmentHeader::SIZE {
        return Err(AppendError::corruption(position, "truncated segment header"));
    }
    let header = SegmentHeader::decode(&buf)
        .map_err(|e| AppendError::corruption(position, e.to_string()))?;
    if header.log_version != log_version {
        return Err(AppendError::corruption(
            position,
            format!("segment header names version {}", header.log_version),
        ));
    }
    Ok(header)
}

pub(crate) fn read_entry_at<D: StorageDevice>(device: &D, position: LogPosition) -> Result<EntryRead> {
    let mut head = [0u8; EntryHeader::SIZE];
    let read = device.read_full_sync(position.byte_offset(), &mut head)?;
    if read == 0 {
        return Ok(EntryRead::End);
    }
    if read < EntryHeader::SIZE {
        if head[..read].iter().all(|b| *b == 0) {
            return Ok(EntryRead::End);
        }
        return Ok(EntryRead::Invalid(AppendError::corruption(
            position,
            "truncated entry header",
        )));
    }

    let header = match EntryHeader::decode(&head) {
        Ok(header) => header,
        Err(_) if head.iter().all(|b| *b == 0) => return Ok(EntryRead::End),
        Err(e) => return Ok(EntryRead::Invalid(AppendError::corruption(position, e.to_string()))),
    };

    let payload_offset = position.byte_offset() + EntryHeader::SIZE as u64;
    let available = device.size_sync()?.saturating_sub(payload_offset);
    if u64::from(header.length) > available {
        return Ok(EntryRead::Invalid(AppendError::corruption(
            position,
            "truncated entry payload",
        )));
    }

    let mut payload = vec![0u8; header.length as usize];
    let read = device.read_full_sync(payload_offset, &mut payload)?;
    if read < payload.len() {
        return Ok(EntryRead::Invalid(AppendError::corruption(
            position,
            "truncated entry payload",
        )));
    }
    if !header.verify(&head, &payload) {
        return Ok(EntryRead::Invalid(AppendError::corruption(
            position,
            "entry checksum mismatch",
        )));
    }

    match decode_payload(&payload, header.command_count) {
        Ok(commands) => Ok(EntryRead::Entry(LogEntry::from_parts(position, &header, commands))),
        Err(e) => Ok(EntryRead::Invalid(AppendError::corruption(position, e.to_string()))),
    }
}

/// Random access and sequential reads over a segment store.
pub struct LogReader<S: SegmentStore> {
    store: Arc<S>,
}

impl<S: SegmentStore> LogReader<S> {
    /// Create a reader over `store`
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Read and verify the entry starting at `position`.
    pub fn read_entry(&self, position: LogPosition) -> Result<LogEntry> {
        let device = self.store.open_segment(position.log_version(), false)?;
        match read_entry_at(&device, position)? {
            EntryRead::Entry(entry) => Ok(entry),
            EntryRead::End => Err(AppendError::corruption(position, "no entry at position")),
            EntryRead::Invalid(err) => Err(err),
        }
    }

    /// Look up `append_index` in the metadata cache and read its entry.
    ///
    /// Returns `Ok(None)` when the cache no longer holds the index.
    pub fn read_by_append_index(
        &self,
        cache: &MetadataCache,
        append_index: AppendIndex,
    ) -> Result<Option<LogEntry>> {
        let Some(position) = cache.get(append_index) else {
            return Ok(None);
        };
        let entry = self.read_entry(position)?;
        if entry.append_index != append_index {
            return Err(AppendError::corruption(
                position,
                format!(
                    "expected append index {append_index}, found {}",
                    entry.append_index
                ),
            ));
        }
        Ok(Some(entry))
    }

    /// Header of segment `log_version`
    pub fn segment_header(&self, log_version: u64) -> Result<SegmentHeader> {
        let device = self.store.open_segment(log_version, false)?;
        read_segment_header(&device, log_version)
    }

    /// Versions of all segments
    pub fn segments(&self) -> Result<Vec<u64>> {
        Ok(self.store.list_segments()?)
    }

    /// Scan every segment from `log_version` on, verifying the checksum
    /// chain across entries and segment boundaries.
    pub fn scan_from(&self, log_version: u64) -> Result<LogScanner<S>> {
        let versions = self
            .store
            .list_segments()?
            .into_iter()
            .filter(|v| *v >= log_version)
            .collect();
        Ok(LogScanner::new(Arc::clone(&self.store), versions))
    }

    /// Scan the whole log
    pub fn scan_all(&self) -> Result<LogScanner<S>> {
        self.scan_from(0)
    }
}

/// Iterator over verified entries.
///
/// Iteration stops at the end of the last segment or at the first entry that
/// fails validation; in the latter case [`error`](LogScanner::error) holds
/// the reason.
pub struct LogScanner<S: SegmentStore> {
    store: Arc<S>,
    versions: Vec<u64>,
    next_version: usize,
    device: Option<S::Device>,
    position: LogPosition,
    running_checksum: Option<u64>,
    last_append_index: AppendIndex,
    error: Option<AppendError>,
}

impl<S: SegmentStore> LogScanner<S> {
    fn new(store: Arc<S>, versions: Vec<u64>) -> Self {
        Self {
            store,
            versions,
            next_version: 0,
            device: None,
            position: LogPosition::START,
            running_checksum: None,
            last_append_index: AppendIndex::BASE,
            error: None,
        }
    }

    /// Validation or I/O error that ended the scan, if any
    pub fn error(&self) -> Option<&AppendError> {
        self.error.as_ref()
    }

    /// Position after the last returned entry
    pub fn position(&self) -> LogPosition {
        self.position
    }

    fn fail(&mut self, err: AppendError) -> Option<LogEntry> {
        self.error = Some(err);
        self.device = None;
        self.next_version = self.versions.len();
        None
    }

    fn open_next_segment(&mut self) -> Result<bool> {
        let Some(&version) = self.versions.get(self.next_version) else {
            return Ok(false);
        };
        self.next_version += 1;

        let device = self.store.open_segment(version, false)?;
        let header = read_segment_header(&device, version)?;
        if let Some(running) = self.running_checksum {
            if header.previous_checksum != running {
                return Err(AppendError::corruption(
                    LogPosition::new(version, 0),
                    "segment does not continue the checksum chain",
                ));
            }
        }
        self.running_checksum = Some(header.previous_checksum);
        self.position = LogPosition::new(version, SegmentHeader::SIZE as u64);
        self.device = Some(device);
        Ok(true)
    }
}

impl<S: SegmentStore> Iterator for LogScanner<S> {
    type Item = LogEntry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.error.is_some() {
                return None;
            }
            if self.device.is_none() {
                match self.open_next_segment() {
                    Ok(true) => {}
                    Ok(false) => return None,
                    Err(err) => return self.fail(err),
                }
            }

            let device = self.device.as_ref()?;
            match read_entry_at(device, self.position) {
                Ok(EntryRead::Entry(entry)) => {
                    if Some(entry.previous_checksum) != self.running_checksum {
                        return self.fail(AppendError::corruption(
                            entry.position,
                            "entry does not continue the checksum chain",
                        ));
                    }
                    if entry.append_index <= self.last_append_index {
                        return self.fail(AppendError::corruption(
                            entry.position,
                            "append index does not increase",
                        ));
                    }
                    self.running_checksum = Some(entry.checksum);
                    self.last_append_index = entry.append_index;
                    self.position = entry.end_position();
                    return Some(entry);
                }
                Ok(EntryRead::End) => {
                    self.device = None;
                }
                Ok(EntryRead::Invalid(err)) | Err(err) => return self.fail(err),
            }
        }
    }
}
