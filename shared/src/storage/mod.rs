mod error;
mod key_value_store;
mod reference_source;
mod storage_backend;
mod storage_sources;
mod stored_reference;

pub use error::StorageError;
pub use key_value_store::{KeyValueStore, MemoryStore};
pub use reference_source::ReferenceSource;
pub use storage_backend::{StorageBackend, ITEM_PREFIX, REFERENCE_PREFIX, STATE_PREFIX};
pub use storage_sources::StorageSources;
pub use stored_reference::StoredReference;

/// When resident references are written to storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersistenceMode {
    /// Every mutation of a synced reference is written through.
    SaveContinuously,
    /// Synced references are written once, at shutdown.
    SaveOnShutdown,
}
