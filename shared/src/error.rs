use thiserror::Error;

use refsync_serde::SerdeErr;

use crate::{
    registry::{ProtocolError, ReferenceError, ValueError},
    storage::StorageError,
    transport::NetworkError,
};

/// A pending request that did not complete in time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeoutError {
    /// No subscribe response arrived from the origin
    #[error("Subscribe to {reference} at {origin} timed out after {millis}ms")]
    Subscribe {
        reference: String,
        origin: String,
        millis: u128,
    },
}

/// Any error the engine can surface to an application.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error(transparent)]
    Value(#[from] ValueError),

    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Codec error: {0}")]
    Codec(#[from] SerdeErr),
}
