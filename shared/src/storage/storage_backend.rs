use crate::{
    protocol::{Codec, WireCodec},
    reference::ReferenceId,
    storage::{KeyValueStore, ReferenceSource, StorageError, StoredReference},
    value::Value,
};

pub const REFERENCE_PREFIX: &str = "ref";
pub const ITEM_PREFIX: &str = "item";
pub const STATE_PREFIX: &str = "state";

/// Adapts a raw `KeyValueStore` into a `ReferenceSource`.
///
/// Every key is written as `<namespace>::<prefix>::<key>`, so several
/// backends can share one store without colliding.
pub struct StorageBackend<S: KeyValueStore> {
    store: S,
    namespace: String,
    codec: Box<dyn Codec>,
}

impl<S: KeyValueStore> StorageBackend<S> {
    pub fn new(store: S, namespace: &str) -> Self {
        Self {
            store,
            namespace: namespace.to_string(),
            codec: Box::new(WireCodec),
        }
    }

    pub fn with_codec(mut self, codec: Box<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    fn key(&self, prefix: &str, key: &str) -> String {
        format!("{}::{}::{}", self.namespace, prefix, key)
    }

    fn prefix(&self, prefix: &str) -> String {
        format!("{}::{}::", self.namespace, prefix)
    }

    fn read_value(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let Some(bytes) = self.store.get(key)? else {
            return Ok(None);
        };
        self.codec
            .decode_value(&bytes)
            .map(Some)
            .map_err(|source| StorageError::Corrupt {
                key: key.to_string(),
                source,
            })
    }

    fn keys_after(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let full = self.prefix(prefix);
        Ok(self
            .store
            .keys_with_prefix(&full)?
            .into_iter()
            .map(|key| key[full.len()..].to_string())
            .collect())
    }
}

impl<S: KeyValueStore> ReferenceSource for StorageBackend<S> {
    fn get_reference(&self, id: &ReferenceId) -> Result<Option<StoredReference>, StorageError> {
        let key = self.key(REFERENCE_PREFIX, &id.to_string());
        let Some(bytes) = self.store.get(&key)? else {
            return Ok(None);
        };
        self.codec
            .decode_stored(&bytes)
            .map(Some)
            .map_err(|source| StorageError::Corrupt { key, source })
    }

    fn set_reference(&mut self, stored: &StoredReference) -> Result<(), StorageError> {
        let key = self.key(REFERENCE_PREFIX, &stored.reference.to_string());
        let bytes = self.codec.encode_stored(stored);
        self.store.set(&key, bytes)
    }

    fn has_reference(&self, id: &ReferenceId) -> Result<bool, StorageError> {
        self.store
            .contains(&self.key(REFERENCE_PREFIX, &id.to_string()))
    }

    fn remove_reference(&mut self, id: &ReferenceId) -> Result<bool, StorageError> {
        let key = self.key(REFERENCE_PREFIX, &id.to_string());
        self.store.remove(&key)
    }

    fn reference_ids(&self) -> Result<Vec<ReferenceId>, StorageError> {
        let mut output = Vec::new();
        for text in self.keys_after(REFERENCE_PREFIX)? {
            match text.parse::<ReferenceId>() {
                Ok(id) => output.push(id),
                Err(err) => log::warn!("Skipping stored key '{}': {}", text, err),
            }
        }
        Ok(output)
    }

    fn get_item(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.read_value(&self.key(ITEM_PREFIX, key))
    }

    fn has_item(&self, key: &str) -> Result<bool, StorageError> {
        self.store.contains(&self.key(ITEM_PREFIX, key))
    }

    fn set_item(&mut self, key: &str, value: &Value) -> Result<(), StorageError> {
        let full = self.key(ITEM_PREFIX, key);
        let bytes = self.codec.encode_value(value);
        self.store.set(&full, bytes)
    }

    fn remove_item(&mut self, key: &str) -> Result<bool, StorageError> {
        let full = self.key(ITEM_PREFIX, key);
        self.store.remove(&full)
    }

    fn item_keys(&self) -> Result<Vec<String>, StorageError> {
        self.keys_after(ITEM_PREFIX)
    }

    fn get_state(&self, name: &str) -> Result<Option<Value>, StorageError> {
        self.read_value(&self.key(STATE_PREFIX, name))
    }

    fn set_state(&mut self, name: &str, value: &Value) -> Result<(), StorageError> {
        let full = self.key(STATE_PREFIX, name);
        let bytes = self.codec.encode_value(value);
        self.store.set(&full, bytes)
    }

    // only this namespace, other backends may share the store
    fn clear(&mut self) -> Result<usize, StorageError> {
        let keys = self
            .store
            .keys_with_prefix(&format!("{}::", self.namespace))?;
        let mut removed = 0;
        for key in keys {
            if self.store.remove(&key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{reference::Endpoint, storage::MemoryStore, value::ValueType};

    fn stored(n: u32) -> StoredReference {
        StoredReference {
            reference: ReferenceId::new_static(&Endpoint::named("disk"), n),
            value: Value::map([("n", Value::Int(n as i64))]),
            declared_type: ValueType::Map,
            sealed: false,
            persistent: true,
            stream_intermediate: false,
            labels: vec![format!("label{}", n)],
        }
    }

    #[test]
    fn references_round_trip_through_the_store() {
        let mut backend = StorageBackend::new(MemoryStore::new(), "app");
        backend.set_reference(&stored(1)).unwrap();
        backend.set_reference(&stored(2)).unwrap();

        assert_eq!(backend.get_reference(&stored(1).reference).unwrap(), Some(stored(1)));
        assert!(backend.has_reference(&stored(2).reference).unwrap());
        assert_eq!(backend.reference_ids().unwrap().len(), 2);

        assert!(backend.remove_reference(&stored(2).reference).unwrap());
        assert!(!backend.has_reference(&stored(2).reference).unwrap());
    }

    #[test]
    fn namespaces_do_not_collide() {
        let mut first = StorageBackend::new(MemoryStore::new(), "one");
        first.set_item("k", &Value::Int(1)).unwrap();
        let shared = first.store().clone();

        let mut second = StorageBackend::new(shared, "two");
        assert_eq!(second.get_item("k").unwrap(), None);
        second.set_item("k", &Value::Int(2)).unwrap();

        assert_eq!(second.store().len(), 2);
        assert_eq!(second.item_keys().unwrap(), vec!["k".to_string()]);
    }

    #[test]
    fn corrupt_entry_reports_its_key() {
        let mut backend = StorageBackend::new(MemoryStore::new(), "app");
        backend.store_mut().set("app::state::session", vec![0xFF]).unwrap();

        let err = backend.get_state("session").unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { key, .. } if key == "app::state::session"));
    }

    #[test]
    fn items_and_state_are_separate() {
        let mut backend = StorageBackend::new(MemoryStore::new(), "app");
        backend.set_item("x", &Value::text("item")).unwrap();
        backend.set_state("x", &Value::text("state")).unwrap();

        assert_eq!(backend.get_item("x").unwrap(), Some(Value::text("item")));
        assert_eq!(backend.get_state("x").unwrap(), Some(Value::text("state")));
        assert!(backend.remove_item("x").unwrap());
        assert_eq!(backend.get_item("x").unwrap(), None);
    }

    #[test]
    fn clear_leaves_other_namespaces_alone() {
        let mut store = MemoryStore::new();
        store.set("other::item::x", vec![0]).unwrap();
        let mut backend = StorageBackend::new(store, "app");
        backend.set_reference(&stored(1)).unwrap();
        backend.set_item("x", &Value::Int(1)).unwrap();
        backend.set_state("session", &Value::Null).unwrap();
        assert!(backend.has_item("x").unwrap());

        assert_eq!(backend.clear().unwrap(), 3);
        assert!(!backend.has_item("x").unwrap());
        assert!(backend.reference_ids().unwrap().is_empty());
        assert_eq!(backend.get_state("session").unwrap(), None);
        assert!(backend.store().contains("other::item::x").unwrap());
    }
}
