//! On-disk format of log segments.
//!
//! ```text
//! segment: [SegmentHeader 64B][entry][entry]...
//! entry:   [EntryHeader 64B][u32 len][command bytes]...
//! ```
//!
//! Every entry checksum is seeded with the checksum of the entry before it,
//! so the checksum chain runs across the whole log, including segment
//! boundaries (the segment header carries the incoming value).

use std::fmt;

use crate::append_index::AppendIndex;
use crate::position::LogPosition;
use crate::transaction::Command;

#[cfg(not(any(feature = "hash-xxh3", feature = "hash-xxh64")))]
compile_error!("Enable a hash feature: `hash-xxh3` (default) or `hash-xxh64`.");

/// Seeded 64-bit hash used for all log checksums.
#[inline]
pub fn checksum64(bytes: &[u8], seed: u64) -> u64 {
    #[cfg(feature = "hash-xxh3")]
    {
        xxhash_rust::xxh3::xxh3_64_with_seed(bytes, seed)
    }

    #[cfg(all(not(feature = "hash-xxh3"), feature = "hash-xxh64"))]
    {
        xxhash_rust::xxh64::xxh64(bytes, seed)
    }
}

/// Errors related to header or payload parsing/validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    BufferTooSmall,
    MagicMismatch,
    MarkerMismatch,
    ChecksumMismatch,
    UnsupportedVersion(u32),
    MalformedPayload,
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::BufferTooSmall => write!(f, "buffer too small"),
            FormatError::MagicMismatch => write!(f, "segment magic mismatch"),
            FormatError::MarkerMismatch => write!(f, "entry marker mismatch"),
            FormatError::ChecksumMismatch => write!(f, "checksum mismatch"),
            FormatError::UnsupportedVersion(version) => {
                write!(f, "unsupported format version {version}")
            }
            FormatError::MalformedPayload => write!(f, "malformed entry payload"),
        }
    }
}

/// Header at the start of every segment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub format_version: u32,
    pub log_version: u64,
    /// Running checksum carried into this segment.
    pub previous_checksum: u64,
    /// Last append index written before this segment.
    pub last_append_index: AppendIndex,
}

impl SegmentHeader {
    pub const MAGIC: [u8; 8] = *b"OXTXLOG\0";
    pub const FORMAT_VERSION: u32 = 1;
    pub const SIZE: usize = 64;
    const CHECKSUM_OFFSET: usize = Self::SIZE - 8;

    pub fn new(log_version: u64, previous_checksum: u64, last_append_index: AppendIndex) -> Self {
        Self {
            format_version: Self::FORMAT_VERSION,
            log_version,
            previous_checksum,
            last_append_index,
        }
    }

    pub fn encode(&self, buf: &mut [u8]) -> Result<(), FormatError> {
        if buf.len() < Self::SIZE {
            return Err(FormatError::BufferTooSmall);
        }

        buf[..Self::SIZE].fill(0);
        buf[0..8].copy_from_slice(&Self::MAGIC);
        buf[8..12].copy_from_slice(&self.format_version.to_le_bytes());
        buf[16..24].copy_from_slice(&self.log_version.to_le_bytes());
        buf[24..32].copy_from_slice(&self.previous_checksum.to_le_bytes());
        buf[32..40].copy_from_slice(&self.last_append_index.get().to_le_bytes());

        let checksum = checksum64(&buf[..Self::CHECKSUM_OFFSET], 0);
        buf[Self::CHECKSUM_OFFSET..Self::SIZE].copy_from_slice(&checksum.to_le_bytes());
        Ok(())
    }

    pub fn decode(buf: &[u8]) -> Result<Self, FormatError> {
        if buf.len() < Self::SIZE {
            return Err(FormatError::BufferTooSmall);
        }
        if buf[..8] != Self::MAGIC {
            return Err(FormatError::MagicMismatch);
        }

        let checksum = read_u64(buf, Self::CHECKSUM_OFFSET);
        if checksum != checksum64(&buf[..Self::CHECKSUM_OFFSET], 0) {
            return Err(FormatError::ChecksumMismatch);
        }

        let format_version = read_u32(buf, 8);
        if format_version != Self::FORMAT_VERSION {
            return Err(FormatError::UnsupportedVersion(format_version));
        }

        Ok(Self {
            format_version,
            log_version: read_u64(buf, 16),
            previous_checksum: read_u64(buf, 24),
            last_append_index: AppendIndex::new(read_u64(buf, 32)),
        })
    }
}

/// Entry flag: the chunk id field is meaningful.
pub const ENTRY_FLAG_HAS_CHUNK_ID: u32 = 1 << 0;

/// Header stored before each entry payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    pub length: u32,
    pub flags: u32,
    pub command_count: u32,
    pub transaction_id: u64,
    pub chunk_id: u64,
    pub append_index: AppendIndex,
    pub previous_append_index: AppendIndex,
    pub previous_checksum: u64,
    pub checksum: u64,
}

impl EntryHeader {
    pub const SIZE: usize = 64;
    const MARKER: u32 = 0x4F58_454E;
    const CHECKSUM_OFFSET: usize = Self::SIZE - 8;

    /// Size of the entry including its header
    pub fn total_size(&self) -> u64 {
        Self::SIZE as u64 + self.length as u64
    }

    pub fn chunk_id(&self) -> Option<u64> {
        (self.flags & ENTRY_FLAG_HAS_CHUNK_ID != 0).then_some(self.chunk_id)
    }

    /// Encode the header into `buf`, computing the checksum over the header
    /// prefix and `payload`.
    pub fn encode(&mut self, buf: &mut [u8], payload: &[u8]) -> Result<(), FormatError> {
        if buf.len() < Self::SIZE {
            return Err(FormatError::BufferTooSmall);
        }
        buf[0..4].copy_from_slice(&self.length.to_le_bytes());
        buf[4..8].copy_from_slice(&self.flags.to_le_bytes());
        buf[8..12].copy_from_slice(&self.command_count.to_le_bytes());
        buf[12..16].copy_from_slice(&Self::MARKER.to_le_bytes());
        buf[16..24].copy_from_slice(&self.transaction_id.to_le_bytes());
        buf[24..32].copy_from_slice(&self.chunk_id.to_le_bytes());
        buf[32..40].copy_from_slice(&self.append_index.get().to_le_bytes());
        buf[40..48].copy_from_slice(&self.previous_append_index.get().to_le_bytes());
        buf[48..56].copy_from_slice(&self.previous_checksum.to_le_bytes());

        self.checksum = entry_checksum(&buf[..Self::CHECKSUM_OFFSET], payload, self.previous_checksum);
        buf[Self::CHECKSUM_OFFSET..Self::SIZE].copy_from_slice(&self.checksum.to_le_bytes());
        Ok(())
    }

    pub fn decode(buf: &[u8]) -> Result<Self, FormatError> {
        if buf.len() < Self::SIZE {
            return Err(FormatError::BufferTooSmall);
        }
        if read_u32(buf, 12) != Self::MARKER {
            return Err(FormatError::MarkerMismatch);
        }
        Ok(Self {
            length: read_u32(buf, 0),
            flags: read_u32(buf, 4),
            command_count: read_u32(buf, 8),
            transaction_id: read_u64(buf, 16),
            chunk_id: read_u64(buf, 24),
            append_index: AppendIndex::new(read_u64(buf, 32)),
            previous_append_index: AppendIndex::new(read_u64(buf, 40)),
            previous_checksum: read_u64(buf, 48),
            checksum: read_u64(buf, Self::CHECKSUM_OFFSET),
        })
    }

    /// Check the stored checksum against the raw header bytes and payload.
    pub fn verify(&self, header_bytes: &[u8], payload: &[u8]) -> bool {
        header_bytes.len() >= Self::SIZE
            && entry_checksum(
                &header_bytes[..Self::CHECKSUM_OFFSET],
                payload,
                self.previous_checksum,
            ) == self.checksum
    }
}

fn entry_checksum(header_prefix: &[u8], payload: &[u8], previous_checksum: u64) -> u64 {
    checksum64(payload, checksum64(header_prefix, previous_checksum))
}

/// Serialize commands as `[u32 len][bytes]` records.
pub fn encode_payload(commands: &[Command], out: &mut Vec<u8>) {
    for command in commands {
        out.extend_from_slice(&(command.len() as u32).to_le_bytes());
        out.extend_from_slice(command);
    }
}

/// Encoded payload size of `commands`.
pub fn payload_size(commands: &[Command]) -> usize {
    commands.iter().map(|c| 4 + c.len()).sum()
}

pub fn decode_payload(payload: &[u8], command_count: u32) -> Result<Vec<Command>, FormatError> {
    let mut commands = Vec::with_capacity(command_count as usize);
    let mut offset = 0usize;
    for _ in 0..command_count {
        if offset + 4 > payload.len() {
            return Err(FormatError::MalformedPayload);
        }
        let len = read_u32(payload, offset) as usize;
        offset += 4;
        if offset + len > payload.len() {
            return Err(FormatError::MalformedPayload);
        }
        commands.push(payload[offset..offset + len].to_vec());
        offset += len;
    }
    if offset != payload.len() {
        return Err(FormatError::MalformedPayload);
    }
    Ok(commands)
}

/// A decoded, verified log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Position of the entry header
    pub position: LogPosition,
    /// Transaction the chunk belongs to
    pub transaction_id: u64,
    /// Chunk id for multi-part transactions
    pub chunk_id: Option<u64>,
    /// Append index of the chunk
    pub append_index: AppendIndex,
    /// Append index of the preceding chunk of the same transaction
    pub previous_append_index: AppendIndex,
    /// Running checksum before this entry
    pub previous_checksum: u64,
    /// Running checksum after this entry
    pub checksum: u64,
    /// Decoded commands
    pub commands: Vec<Command>,
}

impl LogEntry {
    pub(crate) fn from_parts(
        position: LogPosition,
        header: &EntryHeader,
        commands: Vec<Command>,
    ) -> Self {
        Self {
            position,
            transaction_id: header.transaction_id,
            chunk_id: header.chunk_id(),
            append_index: header.append_index,
            previous_append_index: header.previous_append_index,
            previous_checksum: header.previous_checksum,
            checksum: header.checksum,
            commands,
        }
    }

    /// Size of the entry on disk
    pub fn total_size(&self) -> u64 {
        (EntryHeader::SIZE + payload_size(&self.commands)) as u64
    }

    /// Position right after this entry
    pub fn end_position(&self) -> LogPosition {
        self.position.advance(self.total_size())
    }
}

#[inline]
fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

#[inline]
fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}
