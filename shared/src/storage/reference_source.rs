use crate::{
    reference::ReferenceId,
    storage::{StorageError, StoredReference},
    value::Value,
};

/// A place references, items and named state can be loaded from and
/// saved to.
pub trait ReferenceSource: Send {
    fn get_reference(&self, id: &ReferenceId) -> Result<Option<StoredReference>, StorageError>;
    fn set_reference(&mut self, stored: &StoredReference) -> Result<(), StorageError>;
    fn has_reference(&self, id: &ReferenceId) -> Result<bool, StorageError>;
    fn remove_reference(&mut self, id: &ReferenceId) -> Result<bool, StorageError>;
    fn reference_ids(&self) -> Result<Vec<ReferenceId>, StorageError>;

    fn get_item(&self, key: &str) -> Result<Option<Value>, StorageError>;
    fn has_item(&self, key: &str) -> Result<bool, StorageError>;
    fn set_item(&mut self, key: &str, value: &Value) -> Result<(), StorageError>;
    fn remove_item(&mut self, key: &str) -> Result<bool, StorageError>;
    fn item_keys(&self) -> Result<Vec<String>, StorageError>;

    /// Per-endpoint state, such as the last subscriptions of a session.
    fn get_state(&self, name: &str) -> Result<Option<Value>, StorageError>;
    fn set_state(&mut self, name: &str, value: &Value) -> Result<(), StorageError>;

    /// Removes every reference, item and state entry. Returns how many
    /// entries were removed.
    fn clear(&mut self) -> Result<usize, StorageError>;
}
