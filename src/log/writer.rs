//! Serializes command chunks into log entries.

use crate::append_index::AppendIndex;
use crate::device::SegmentStore;
use crate::error::{AppendError, Result};
use crate::log::format::{encode_payload, payload_size, EntryHeader, ENTRY_FLAG_HAS_CHUNK_ID};
use crate::log::log_file::LogFile;
use crate::log::types::LogAppendEvent;
use crate::position::LogPosition;
use crate::transaction::CommandChunk;

/// Writes entries into the active segment, continuing the running checksum.
pub struct TransactionLogWriter<S: SegmentStore> {
    log_file: LogFile<S>,
    scratch: Vec<u8>,
    before_append: LogPosition,
    appended_bytes: u64,
}

impl<S: SegmentStore> TransactionLogWriter<S> {
    /// Create a writer over an opened log file
    pub fn new(log_file: LogFile<S>) -> Self {
        let before_append = log_file.position();
        Self {
            log_file,
            scratch: Vec::new(),
            before_append,
            appended_bytes: 0,
        }
    }

    /// Append `chunk` as the entry for `append_index`.
    ///
    /// `checksum` is the running checksum before this entry; the returned
    /// value is the running checksum after it.
    pub fn append(
        &mut self,
        chunk: &CommandChunk,
        append_index: AppendIndex,
        checksum: u64,
        previous_append_index: AppendIndex,
        event: &mut LogAppendEvent,
    ) -> Result<u64> {
        let payload_len = payload_size(chunk.commands());
        let length = u32::try_from(payload_len).map_err(|_| {
            AppendError::InvalidArgument(format!(
                "chunk payload of {payload_len} bytes exceeds the entry size limit"
            ))
        })?;

        let mut header = EntryHeader {
            length,
            flags: if chunk.chunk_id().is_some() {
                ENTRY_FLAG_HAS_CHUNK_ID
            } else {
                0
            },
            command_count: chunk.commands().len() as u32,
            transaction_id: chunk.transaction_id(),
            chunk_id: chunk.chunk_id().unwrap_or(0),
            append_index,
            previous_append_index,
            previous_checksum: checksum,
            checksum: 0,
        };

        self.scratch.clear();
        self.scratch.resize(EntryHeader::SIZE, 0);
        encode_payload(chunk.commands(), &mut self.scratch);
        let (head, payload) = self.scratch.split_at_mut(EntryHeader::SIZE);
        header
            .encode(head, payload)
            .map_err(|e| AppendError::corruption(self.log_file.position(), e.to_string()))?;

        self.before_append = self.log_file.position();
        self.log_file.append_bytes(&self.scratch)?;
        self.log_file.record_append(append_index, header.checksum);

        let written = self.scratch.len() as u64;
        self.appended_bytes += written;
        event.chunks += 1;
        event.appended_bytes += written;
        Ok(header.checksum)
    }

    /// Position right before the most recently appended entry
    pub fn before_append_position(&self) -> LogPosition {
        self.before_append
    }

    /// Position where the next entry goes
    pub fn current_position(&self) -> LogPosition {
        self.log_file.position()
    }

    /// Reset the appended bytes counter
    pub fn reset_appended_bytes_counter(&mut self) {
        self.appended_bytes = 0;
    }

    /// Bytes appended since the last reset
    pub fn appended_bytes(&self) -> u64 {
        self.appended_bytes
    }

    /// Force everything appended so far.
    pub fn force(&mut self, event: &mut LogAppendEvent) -> Result<()> {
        self.log_file.force()?;
        event.forced = true;
        Ok(())
    }

    /// The underlying log file
    pub fn log_file(&self) -> &LogFile<S> {
        &self.log_file
    }

    /// The underlying log file, mutably
    pub fn log_file_mut(&mut self) -> &mut LogFile<S> {
        &mut self.log_file
    }
}
