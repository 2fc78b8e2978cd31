//! Error types for event storage.

use std::io;

use tailstore_core::EngineError;
use thiserror::Error;

use crate::codec::CodecError;

/// Event storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No sampling decision has been recorded for the trace ID.
    #[error("key not found")]
    NotFound,

    /// Flush refused because the on-disk size reached the effective limit.
    #[error("flush pending writes: configured storage limit reached: {source}")]
    LimitReached {
        /// Out-of-space OS error
        source: io::Error,
    },

    /// The underlying engine failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Encoding or decoding an event failed; passed through unchanged.
    #[error(transparent)]
    Codec(CodecError),

    /// The trace ID contains the key separator, so its keys would overlap
    /// another trace's scan range.
    #[error("invalid trace id {0:?}: contains ':'")]
    InvalidTraceId(String),

    /// Tail-sampling configuration rejected.
    #[error("invalid tail sampling config: {0}")]
    InvalidConfig(String),
}

impl StorageError {
    pub(crate) fn limit_reached() -> Self {
        StorageError::LimitReached { source: no_space() }
    }

    /// True for [`StorageError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound)
    }

    /// True for [`StorageError::LimitReached`].
    pub fn is_limit_reached(&self) -> bool {
        matches!(self, StorageError::LimitReached { .. })
    }
}

#[cfg(unix)]
fn no_space() -> io::Error {
    io::Error::from_raw_os_error(libc::ENOSPC)
}

#[cfg(not(unix))]
fn no_space() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "no space left on device")
}

/// Result alias for event storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
