//! Database panic signal
//!
//! Once tripped, the signal is permanent: the appender stops issuing
//! physical writes and every later batch fails with
//! [`AppendError::Panicked`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crate::error::{AppendError, Result};

/// Shared, sticky "database panic" flag.
#[derive(Debug, Default)]
pub struct PanicSignal {
    panicked: AtomicBool,
    cause: OnceLock<Arc<AppendError>>,
}

impl PanicSignal {
    /// Create a healthy signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the signal. The first cause wins; later calls are ignored.
    pub fn panic(&self, cause: AppendError) {
        if self.cause.set(Arc::new(cause)).is_ok() {
            if let Some(cause) = self.cause.get() {
                tracing::error!(error = %cause, "database panic");
            }
        }
        self.panicked.store(true, Ordering::Release);
    }

    /// Check if the signal has been tripped
    #[inline]
    pub fn has_panicked(&self) -> bool {
        self.panicked.load(Ordering::Acquire)
    }

    /// The cause recorded by the first [`panic`](Self::panic) call
    pub fn cause(&self) -> Option<Arc<AppendError>> {
        self.cause.get().cloned()
    }

    /// Fail with [`AppendError::Panicked`] if the signal is tripped.
    pub fn assert_no_panic(&self) -> Result<()> {
        if !self.has_panicked() {
            return Ok(());
        }
        let cause = self
            .cause()
            .unwrap_or_else(|| Arc::new(AppendError::InvalidState("panic without cause")));
        Err(AppendError::Panicked(cause))
    }
}
