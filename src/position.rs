//! Log position types
//!
//! A [`LogPosition`] identifies a byte inside the segmented transaction log:
//! the segment (log version) plus the byte offset inside that segment file.

use std::cmp::Ordering;
use std::fmt;

/// A position in the transaction log.
///
/// Positions order first by log version, then by byte offset, which matches
/// the order in which bytes are appended.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LogPosition {
    log_version: u64,
    byte_offset: u64,
}

impl LogPosition {
    /// Start of the very first segment.
    pub const START: Self = Self::new(0, 0);

    /// Create a new position
    #[inline]
    pub const fn new(log_version: u64, byte_offset: u64) -> Self {
        Self {
            log_version,
            byte_offset,
        }
    }

    /// Segment version this position belongs to
    #[inline]
    pub const fn log_version(&self) -> u64 {
        self.log_version
    }

    /// Offset inside the segment file
    #[inline]
    pub const fn byte_offset(&self) -> u64 {
        self.byte_offset
    }

    /// Same segment, offset moved forward by `bytes`
    #[inline]
    pub const fn advance(&self, bytes: u64) -> Self {
        Self::new(self.log_version, self.byte_offset + bytes)
    }
}

impl PartialOrd for LogPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LogPosition {
    fn cmp(&self, other: &Self) -> Ordering {
        self.log_version
            .cmp(&other.log_version)
            .then(self.byte_offset.cmp(&other.byte_offset))
    }
}

impl fmt::Debug for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogPosition")
            .field("log_version", &self.log_version)
            .field("byte_offset", &self.byte_offset)
            .finish()
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.log_version, self.byte_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_across_segments() {
        let a = LogPosition::new(0, 4096);
        let b = LogPosition::new(1, 64);
        assert!(a < b);
        assert!(LogPosition::new(1, 64) < LogPosition::new(1, 65));
        assert_eq!(LogPosition::START, LogPosition::default());
    }

    #[test]
    fn test_advance() {
        let pos = LogPosition::new(3, 100).advance(28);
        assert_eq!(pos.log_version(), 3);
        assert_eq!(pos.byte_offset(), 128);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", LogPosition::new(2, 640)), "2:640");
    }
}
