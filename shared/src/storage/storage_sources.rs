use log::warn;

use crate::{
    reference::ReferenceId,
    storage::{ReferenceSource, StorageError, StoredReference},
    value::Value,
};

/// Storage sources ordered by priority, highest first.
pub struct StorageSources {
    sources: Vec<(i32, Box<dyn ReferenceSource>)>,
}

impl StorageSources {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    /// Sources with equal priority keep insertion order.
    pub fn add(&mut self, source: Box<dyn ReferenceSource>, priority: i32) {
        let index = self
            .sources
            .iter()
            .position(|(existing, _)| *existing < priority)
            .unwrap_or(self.sources.len());
        self.sources.insert(index, (priority, source));
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// First hit wins. A failing source is logged and skipped.
    pub fn get_reference(&self, id: &ReferenceId) -> Option<StoredReference> {
        for (priority, source) in &self.sources {
            match source.get_reference(id) {
                Ok(Some(stored)) => return Some(stored),
                Ok(None) => continue,
                Err(err) => {
                    warn!("Storage source (priority {}) failed to read {}: {}", priority, id, err);
                }
            }
        }
        None
    }

    pub fn has_reference(&self, id: &ReferenceId) -> bool {
        self.sources
            .iter()
            .any(|(_, source)| source.has_reference(id).unwrap_or(false))
    }

    /// First hit wins, like `get_reference`.
    pub fn get_item(&self, key: &str) -> Option<Value> {
        for (priority, source) in &self.sources {
            match source.get_item(key) {
                Ok(Some(value)) => return Some(value),
                Ok(None) => continue,
                Err(err) => {
                    warn!("Storage source (priority {}) failed to read item '{}': {}", priority, key, err);
                }
            }
        }
        None
    }

    pub fn has_item(&self, key: &str) -> bool {
        self.sources
            .iter()
            .any(|(_, source)| source.has_item(key).unwrap_or(false))
    }

    /// Every item key across all sources, sorted and without duplicates.
    pub fn item_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        for (priority, source) in &self.sources {
            match source.item_keys() {
                Ok(found) => keys.extend(found),
                Err(err) => warn!("Storage source (priority {}) failed to list items: {}", priority, err),
            }
        }
        keys.sort();
        keys.dedup();
        keys
    }

    pub fn set_item(&mut self, key: &str, value: &Value) -> Result<(), StorageError> {
        self.primary_mut()?.set_item(key, value)
    }

    /// Removes the item from every source, so a lower-priority copy does
    /// not resurface.
    pub fn remove_item(&mut self, key: &str) -> Result<bool, StorageError> {
        if self.sources.is_empty() {
            return Err(StorageError::NoSource);
        }
        let mut removed = false;
        for (_, source) in &mut self.sources {
            removed |= source.remove_item(key)?;
        }
        Ok(removed)
    }

    pub fn get_state(&self, name: &str) -> Option<Value> {
        for (priority, source) in &self.sources {
            match source.get_state(name) {
                Ok(Some(value)) => return Some(value),
                Ok(None) => continue,
                Err(err) => {
                    warn!("Storage source (priority {}) failed to read state '{}': {}", priority, name, err);
                }
            }
        }
        None
    }

    pub fn set_state(&mut self, name: &str, value: &Value) -> Result<(), StorageError> {
        self.primary_mut()?.set_state(name, value)
    }

    /// Empties every source.
    pub fn clear(&mut self) -> Result<usize, StorageError> {
        let mut removed = 0;
        for (_, source) in &mut self.sources {
            removed += source.clear()?;
        }
        Ok(removed)
    }

    /// Writes go to the highest-priority source.
    pub fn primary(&self) -> Result<&dyn ReferenceSource, StorageError> {
        self.sources
            .first()
            .map(|(_, source)| source.as_ref())
            .ok_or(StorageError::NoSource)
    }

    pub fn primary_mut(&mut self) -> Result<&mut (dyn ReferenceSource + 'static), StorageError> {
        self.sources
            .first_mut()
            .map(|(_, source)| source.as_mut())
            .ok_or(StorageError::NoSource)
    }
}

impl Default for StorageSources {
    fn default() -> Self {
        Self::new()
    }
}
