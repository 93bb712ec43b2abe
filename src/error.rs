//! Error types for the append pipeline
//!
//! A single failure is frequently delivered to every producer of a drained
//! batch, so [`AppendError`] is cheap to clone: non-clonable causes such as
//! `io::Error` are kept behind an `Arc`.

use std::fmt;
use std::io;
use std::sync::Arc;

use crate::position::LogPosition;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AppendError>;

/// Errors surfaced by the transaction log.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AppendError {
    /// The log queue is not running (never started, or shut down).
    #[error("transaction log is shut down")]
    Shutdown,
    /// The database panic signal has been tripped; no further writes happen.
    #[error("database has panicked: {0}")]
    Panicked(#[source] Arc<AppendError>),
    /// I/O failure while writing, forcing, rotating or reading the log.
    #[error("log i/o error: {0}")]
    Io(#[source] Arc<io::Error>),
    /// Log bytes failed validation.
    #[error("corrupted log at {position}: {reason}")]
    Corruption {
        /// Position of the offending entry or header.
        position: LogPosition,
        /// What failed to validate.
        reason: String,
    },
    /// Caller supplied an unusable argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Operation not allowed in the current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    /// The appender thread unwound while processing a batch.
    #[error("log appender panicked: {0}")]
    WriterPanicked(String),
}

impl AppendError {
    pub(crate) fn corruption(position: LogPosition, reason: impl Into<String>) -> Self {
        Self::Corruption {
            position,
            reason: reason.into(),
        }
    }

    /// Error category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppendError::Shutdown => ErrorKind::Shutdown,
            AppendError::Panicked(_) | AppendError::WriterPanicked(_) => ErrorKind::Panic,
            AppendError::Io(_) => ErrorKind::Io,
            AppendError::Corruption { .. } => ErrorKind::Corruption,
            AppendError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            AppendError::InvalidState(_) => ErrorKind::InvalidState,
        }
    }

    /// Check whether this error was caused by shutdown.
    #[inline]
    pub fn is_shutdown(&self) -> bool {
        matches!(self, AppendError::Shutdown)
    }

    /// Check whether this error stems from a database panic.
    #[inline]
    pub fn is_panic(&self) -> bool {
        self.kind() == ErrorKind::Panic
    }

    /// Follow `Panicked` wrappers down to the original cause.
    pub fn root_cause(&self) -> &AppendError {
        let mut current = self;
        while let AppendError::Panicked(cause) = current {
            current = cause;
        }
        current
    }
}

impl From<io::Error> for AppendError {
    fn from(err: io::Error) -> Self {
        AppendError::Io(Arc::new(err))
    }
}

/// Error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Pipeline stopped.
    Shutdown,
    /// Database panic or appender unwinding.
    Panic,
    /// I/O failures.
    Io,
    /// Data corruption.
    Corruption,
    /// Configuration or argument errors.
    InvalidArgument,
    /// Lifecycle misuse.
    InvalidState,
}

impl ErrorKind {
    /// Get the kind as a string
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Shutdown => "Shutdown",
            ErrorKind::Panic => "Panic",
            ErrorKind::Io => "Io",
            ErrorKind::Corruption => "Corruption",
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::InvalidState => "InvalidState",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
