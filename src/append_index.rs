//! Append index allocation
//!
//! Append indexes order command chunks in the log. They are issued by a
//! single allocator that only the appender thread advances.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonically increasing sequence number of an appended command chunk.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AppendIndex(u64);

impl AppendIndex {
    /// "Nothing appended yet". Never issued by [`AppendIndexAllocator`].
    pub const BASE: Self = Self(0);

    /// Wrap a raw value
    #[inline]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw value
    #[inline]
    pub const fn get(&self) -> u64 {
        self.0
    }

    /// Check if this is the base sentinel
    #[inline]
    pub const fn is_base(&self) -> bool {
        self.0 == Self::BASE.0
    }

    /// The index that follows this one
    #[inline]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl From<u64> for AppendIndex {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for AppendIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Issues append indexes.
///
/// Atomic so that readers on other threads can observe the last issued
/// value; only the appender thread calls [`next_append_index`] and
/// [`reset_to`].
///
/// [`next_append_index`]: AppendIndexAllocator::next_append_index
/// [`reset_to`]: AppendIndexAllocator::reset_to
#[derive(Debug)]
pub struct AppendIndexAllocator {
    last: AtomicU64,
}

impl AppendIndexAllocator {
    /// Create an allocator whose next issued value is `last + 1`.
    pub fn new(last: AppendIndex) -> Self {
        Self {
            last: AtomicU64::new(last.get()),
        }
    }

    /// Issue the next append index.
    #[inline]
    pub fn next_append_index(&self) -> AppendIndex {
        AppendIndex(self.last.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Last issued append index (or the seed value).
    #[inline]
    pub fn last_append_index(&self) -> AppendIndex {
        AppendIndex(self.last.load(Ordering::Acquire))
    }

    /// Roll the counter back after a batch failed before completing, so
    /// committed indexes stay gap free.
    pub(crate) fn reset_to(&self, last: AppendIndex) {
        self.last.store(last.get(), Ordering::Release);
    }
}

impl Default for AppendIndexAllocator {
    fn default() -> Self {
        Self::new(AppendIndex::BASE)
    }
}
