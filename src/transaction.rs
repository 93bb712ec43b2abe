//! Storage transactions submitted to the log
//!
//! A [`StorageTransaction`] is the unit one producer hands to the log: a
//! chain of [`CommandChunk`]s. Small transactions carry one chunk; large
//! transactions are split into several chunks which are linked through their
//! append indexes.

use crate::append_index::AppendIndex;
use crate::position::LogPosition;

/// One serialized change.
pub type Command = Vec<u8>;

/// Where and how a chunk ended up in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendedChunk {
    /// Append index assigned to the chunk.
    pub append_index: AppendIndex,
    /// Log position right before the chunk's entry.
    pub position_before: LogPosition,
    /// Log position right after the chunk's entry.
    pub position_after: LogPosition,
    /// Running checksum after the chunk.
    pub checksum: u64,
}

/// A group of commands appended as one log entry.
#[derive(Debug, Clone)]
pub struct CommandChunk {
    commands: Vec<Command>,
    transaction_id: u64,
    chunk_id: Option<u64>,
    previous_append_index: AppendIndex,
    appended: Option<AppendedChunk>,
}

impl CommandChunk {
    /// Create a chunk for `transaction_id`.
    pub fn new(transaction_id: u64, commands: Vec<Command>) -> Self {
        Self {
            commands,
            transaction_id,
            chunk_id: None,
            previous_append_index: AppendIndex::BASE,
            appended: None,
        }
    }

    /// Mark this chunk as part `chunk_id` of a multi-part transaction.
    pub fn with_chunk_id(mut self, chunk_id: u64) -> Self {
        self.chunk_id = Some(chunk_id);
        self
    }

    /// Link this chunk to the append index of the preceding chunk.
    pub fn with_previous_append_index(mut self, index: AppendIndex) -> Self {
        self.previous_append_index = index;
        self
    }

    /// Commands in this chunk
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Transaction id
    pub fn transaction_id(&self) -> u64 {
        self.transaction_id
    }

    /// Chunk id, if part of a multi-part transaction
    pub fn chunk_id(&self) -> Option<u64> {
        self.chunk_id
    }

    /// Append index of the preceding chunk (BASE when none)
    pub fn previous_append_index(&self) -> AppendIndex {
        self.previous_append_index
    }

    /// Append outcome, set once the chunk has been written
    pub fn appended(&self) -> Option<AppendedChunk> {
        self.appended
    }

    /// Total payload bytes of all commands
    pub fn payload_len(&self) -> usize {
        self.commands.iter().map(Vec::len).sum()
    }

    pub(crate) fn set_previous_append_index(&mut self, index: AppendIndex) {
        self.previous_append_index = index;
    }

    pub(crate) fn batch_appended(&mut self, appended: AppendedChunk) {
        self.appended = Some(appended);
    }

    pub(crate) fn clear_appended(&mut self) {
        self.appended = None;
    }
}

/// The batch one producer submits: a chain of command chunks.
#[derive(Debug, Clone, Default)]
pub struct StorageTransaction {
    chunks: Vec<CommandChunk>,
}

impl StorageTransaction {
    /// Create an empty transaction
    pub fn new() -> Self {
        Self::default()
    }

    /// A transaction made of a single chunk.
    pub fn single(transaction_id: u64, commands: Vec<Command>) -> Self {
        Self {
            chunks: vec![CommandChunk::new(transaction_id, commands)],
        }
    }

    /// Append a chunk to the chain.
    pub fn push_chunk(&mut self, chunk: CommandChunk) {
        self.chunks.push(chunk);
    }

    /// Builder form of [`push_chunk`](Self::push_chunk).
    pub fn with_chunk(mut self, chunk: CommandChunk) -> Self {
        self.push_chunk(chunk);
        self
    }

    /// Chunks in chain order
    pub fn chunks(&self) -> &[CommandChunk] {
        &self.chunks
    }

    pub(crate) fn chunks_mut(&mut self) -> &mut [CommandChunk] {
        &mut self.chunks
    }

    /// Number of chunks
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Check if the chain has no chunks
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Append index of the last chunk, once appended
    pub fn last_append_index(&self) -> Option<AppendIndex> {
        self.chunks
            .last()
            .and_then(|chunk| chunk.appended)
            .map(|appended| appended.append_index)
    }
}

impl From<CommandChunk> for StorageTransaction {
    fn from(chunk: CommandChunk) -> Self {
        Self {
            chunks: vec![chunk],
        }
    }
}
