use std::sync::{Arc, Mutex};

use refsync_shared::{KeyValueStore, MemoryStore, StorageError};

/// A `MemoryStore` that outlives the runtime using it, so a restarted node
/// can read what the previous one wrote. Clones share the same entries.
#[derive(Clone, Default)]
pub struct SharedStore {
    inner: Arc<Mutex<MemoryStore>>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for SharedStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.lock().unwrap().get(key)
    }

    fn set(&mut self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        self.inner.lock().unwrap().set(key, bytes)
    }

    fn remove(&mut self, key: &str) -> Result<bool, StorageError> {
        self.inner.lock().unwrap().remove(key)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.inner.lock().unwrap().keys_with_prefix(prefix)
    }
}
