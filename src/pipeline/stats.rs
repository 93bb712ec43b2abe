//! Append pipeline counters.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::log::LogAppendEvent;

/// Counters updated by the appender thread.
#[derive(Debug, Default)]
pub struct AppendStats {
    batches: AtomicU64,
    elements: AtomicU64,
    chunks: AtomicU64,
    bytes: AtomicU64,
    rotations: AtomicU64,
    forces: AtomicU64,
    failed_batches: AtomicU64,
    failed_elements: AtomicU64,
}

impl AppendStats {
    /// Fold in a successfully completed batch
    pub fn record_batch(&self, event: &LogAppendEvent) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.elements
            .fetch_add(event.batch_size as u64, Ordering::Relaxed);
        self.chunks.fetch_add(event.chunks as u64, Ordering::Relaxed);
        self.bytes.fetch_add(event.appended_bytes, Ordering::Relaxed);
        if event.log_rotated {
            self.rotations.fetch_add(1, Ordering::Relaxed);
        }
        if event.forced {
            self.forces.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Count a failed batch of `elements`
    pub fn record_failure(&self, elements: usize) {
        self.failed_batches.fetch_add(1, Ordering::Relaxed);
        self.failed_elements
            .fetch_add(elements as u64, Ordering::Relaxed);
    }

    /// Count elements failed outside a batch (shutdown)
    pub fn record_failed_elements(&self, elements: usize) {
        self.failed_elements
            .fetch_add(elements as u64, Ordering::Relaxed);
    }

    /// Take a snapshot
    pub fn snapshot(&self) -> AppendStatsSnapshot {
        AppendStatsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            elements: self.elements.load(Ordering::Relaxed),
            chunks: self.chunks.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            forces: self.forces.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
            failed_elements: self.failed_elements.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`AppendStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendStatsSnapshot {
    /// Batches written
    pub batches: u64,
    /// Elements committed
    pub elements: u64,
    /// Chunks written
    pub chunks: u64,
    /// Bytes appended
    pub bytes: u64,
    /// Rotations performed
    pub rotations: u64,
    /// Explicit forces
    pub forces: u64,
    /// Batches that failed
    pub failed_batches: u64,
    /// Elements that failed, including shutdown
    pub failed_elements: u64,
}

impl AppendStatsSnapshot {
    /// Average elements per written batch
    pub fn average_batch_size(&self) -> f64 {
        if self.batches == 0 {
            0.0
        } else {
            self.elements as f64 / self.batches as f64
        }
    }
}
