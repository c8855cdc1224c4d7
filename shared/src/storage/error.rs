use thiserror::Error;

use refsync_serde::SerdeErr;

/// Errors raised by key/value stores and the storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Filesystem or device failure
    #[error("Storage I/O error on '{key}': {reason}")]
    Io { key: String, reason: String },

    /// Stored bytes could not be decoded
    #[error("Stored entry '{key}' is corrupt: {source}")]
    Corrupt { key: String, source: SerdeErr },

    /// No storage source is configured
    #[error("No storage source configured")]
    NoSource,
}
