//! Error types for TailStore engine operations
//!
//! All engine errors are represented by the [`EngineError`] enum. I/O and
//! corruption variants carry the file path and offset so recovery logs can
//! point at the exact spot on disk.

use std::path::PathBuf;

use thiserror::Error;

/// TailStore engine error types with detailed context
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// I/O operation failed
    #[error("I/O error{}: {message} ({kind})", display_path(.path))]
    Io {
        /// The file path where the error occurred
        path: Option<PathBuf>,
        /// The underlying I/O error kind
        kind: std::io::ErrorKind,
        /// Human-readable description
        message: String,
    },

    /// WAL segment is corrupted and cannot be recovered
    #[error("WAL corrupted in {} at offset {offset}: {reason}", .path.display())]
    WalCorrupted {
        /// Path to the corrupted WAL segment
        path: PathBuf,
        /// Byte offset where corruption was detected
        offset: u64,
        /// Description of the corruption
        reason: String,
    },

    /// Checksum verification failed
    #[error(
        "Checksum mismatch in {} at offset {offset}: expected 0x{expected:08x}, got 0x{actual:08x}",
        .path.display()
    )]
    ChecksumMismatch {
        /// File where checksum failed
        path: PathBuf,
        /// Expected checksum value
        expected: u32,
        /// Actual checksum computed
        actual: u32,
        /// Byte offset of the corrupted data
        offset: u64,
    },

    /// Torn write detected (partial record at end of segment)
    #[error(
        "Torn write in {} at offset {offset}: expected {expected_size} bytes, only {available_bytes} available",
        .path.display()
    )]
    TornWrite {
        /// Segment with torn write
        path: PathBuf,
        /// Expected record size
        expected_size: u32,
        /// Actual bytes available
        available_bytes: u64,
        /// Offset where torn write begins
        offset: u64,
    },

    /// Magic bytes not found at expected location
    #[error(
        "Magic bytes not found in {} at offset {offset}: found {}",
        .path.display(), hex_bytes(.found_bytes)
    )]
    NoMagicFound {
        /// File being read
        path: PathBuf,
        /// Offset where magic was expected
        offset: u64,
        /// Bytes actually found
        found_bytes: [u8; 4],
    },

    /// Key or value size exceeds the configured maximum
    #[error("Entry {component} too large: {entry_size} bytes exceeds limit of {max_size} bytes")]
    OversizedEntry {
        /// Size of the oversized component
        entry_size: u64,
        /// Maximum allowed size
        max_size: u64,
        /// Whether it's the key or value that's oversized
        component: &'static str,
    },

    /// Keys must be at least one byte long
    #[error("key cannot be empty")]
    EmptyKey,

    /// No live entry exists for the requested key
    #[error("key not found")]
    KeyNotFound,

    /// The transaction cannot hold another entry; commit it and retry
    #[error("transaction too big: {pending_entries} entries / {pending_bytes} bytes pending")]
    TxnTooBig {
        /// Entries already buffered in the transaction
        pending_entries: usize,
        /// Bytes already buffered in the transaction
        pending_bytes: usize,
    },

    /// Engine configuration rejected by [`crate::Config::validate`]
    #[error("invalid engine config: {0}")]
    InvalidConfig(String),
}

fn display_path(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!(" in {}", path.display()),
        None => String::new(),
    }
}

fn hex_bytes(bytes: &[u8; 4]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

impl EngineError {
    /// Build an [`EngineError::Io`] for a failed operation on `path`.
    pub(crate) fn io(path: impl Into<PathBuf>, what: &str, err: std::io::Error) -> Self {
        EngineError::Io {
            path: Some(path.into()),
            kind: err.kind(),
            message: format!("{}: {}", what, err),
        }
    }

    /// True for [`EngineError::KeyNotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::KeyNotFound)
    }

    /// True for [`EngineError::TxnTooBig`].
    pub fn is_txn_too_big(&self) -> bool {
        matches!(self, EngineError::TxnTooBig { .. })
    }
}

/// Convert std::io::Error to EngineError::Io
impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io {
            path: None,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
