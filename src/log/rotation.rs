//! Log rotation policies.
//!
//! After every drained batch the appender asks the rotation layer whether
//! the active segment is due. A rotation forces and seals the segment, so
//! when it happens no separate force is needed.

use std::fmt;
use std::time::Duration;

use crate::device::SegmentStore;
use crate::error::Result;
use crate::log::types::{LogAppendEvent, SegmentInfo};
use crate::log::writer::TransactionLogWriter;

/// Default segment size threshold.
pub const DEFAULT_ROTATION_THRESHOLD_BYTES: u64 = 256 * 1024 * 1024;

/// Decides when the active segment is sealed.
pub trait RotationPolicy: Send + 'static {
    /// Whether the segment described by `info` should be rotated now
    fn should_rotate(&self, info: &SegmentInfo) -> bool;
}

/// Rotate when a segment reaches a size or an age.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationThreshold {
    /// Rotate once the segment holds at least this many bytes
    pub max_bytes: Option<u64>,
    /// Rotate once the segment has been open this long
    pub max_age: Option<Duration>,
}

impl Default for RotationThreshold {
    fn default() -> Self {
        Self {
            max_bytes: Some(DEFAULT_ROTATION_THRESHOLD_BYTES),
            max_age: None,
        }
    }
}

impl RotationThreshold {
    /// Size-only threshold
    pub fn bytes(max_bytes: u64) -> Self {
        Self {
            max_bytes: Some(max_bytes),
            max_age: None,
        }
    }

    /// Set the age threshold
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }
}

impl RotationPolicy for RotationThreshold {
    fn should_rotate(&self, info: &SegmentInfo) -> bool {
        self.max_bytes.is_some_and(|max| info.size >= max)
            || self.max_age.is_some_and(|max| info.age >= max)
    }
}

/// Never rotate.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRotate;

impl RotationPolicy for NeverRotate {
    fn should_rotate(&self, _info: &SegmentInfo) -> bool {
        false
    }
}

/// Applies a [`RotationPolicy`] to a writer.
pub struct LogRotation {
    policy: Box<dyn RotationPolicy>,
}

impl LogRotation {
    /// Create a rotation driver for `policy`
    pub fn new(policy: impl RotationPolicy) -> Self {
        Self {
            policy: Box::new(policy),
        }
    }

    /// Rotate the active segment if the policy asks for it.
    ///
    /// Returns whether a rotation happened; when it did not, the caller must
    /// force the writer itself.
    pub fn rotate_if_needed<S: SegmentStore>(
        &self,
        writer: &mut TransactionLogWriter<S>,
        event: &mut LogAppendEvent,
    ) -> Result<bool> {
        let info = writer.log_file().segment_info();
        if !self.policy.should_rotate(&info) {
            return Ok(false);
        }

        let next = writer.log_file_mut().rotate()?;
        event.log_rotated = true;
        tracing::info!(
            sealed = info.log_version,
            size = info.size,
            log_version = next,
            "rotated transaction log"
        );
        Ok(true)
    }
}

impl Default for LogRotation {
    fn default() -> Self {
        Self::new(RotationThreshold::default())
    }
}

impl fmt::Debug for LogRotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogRotation").finish_non_exhaustive()
    }
}
