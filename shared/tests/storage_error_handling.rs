/// Tests for storage error handling
/// Covers corrupt entries, missing sources and source priority
use refsync_shared::{
    Endpoint, KeyValueStore, MemoryStore, ReferenceId, ReferenceSource, StorageBackend,
    StorageError, StorageSources, StoredReference, Value, ValueType,
};

fn stored(unique: u32, value: Value) -> StoredReference {
    StoredReference {
        reference: ReferenceId::new_static(&Endpoint::named("alice"), unique),
        value,
        declared_type: ValueType::Any,
        sealed: false,
        persistent: true,
        stream_intermediate: false,
        labels: Vec::new(),
    }
}

#[test]
fn corrupt_entry_is_reported() {
    let entry = stored(1, Value::Int(1));
    let mut backend = StorageBackend::new(MemoryStore::new(), "ns");
    backend.set_reference(&entry).unwrap();

    let keys = backend.store().keys_with_prefix("ns::ref::").unwrap();
    assert_eq!(keys.len(), 1);
    backend.store_mut().set(&keys[0], vec![0xFF]).unwrap();

    match backend.get_reference(&entry.reference) {
        Err(StorageError::Corrupt { key, .. }) => assert_eq!(key, keys[0]),
        other => panic!("Expected Corrupt error, got {:?}", other),
    }
}

#[test]
fn missing_primary_source_is_reported() {
    let mut sources = StorageSources::new();
    assert!(matches!(sources.primary_mut(), Err(StorageError::NoSource)));
    assert!(sources.get_reference(&stored(1, Value::Null).reference).is_none());
}

#[test]
fn higher_priority_source_wins() {
    let entry_low = stored(1, Value::Int(1));
    let entry_high = stored(1, Value::Int(2));

    let mut low = StorageBackend::new(MemoryStore::new(), "low");
    low.set_reference(&entry_low).unwrap();
    let mut high = StorageBackend::new(MemoryStore::new(), "high");
    high.set_reference(&entry_high).unwrap();

    let mut sources = StorageSources::new();
    sources.add(Box::new(low), 0);
    sources.add(Box::new(high), 10);

    let found = sources.get_reference(&entry_low.reference).unwrap();
    assert_eq!(found.value, Value::Int(2));
    assert_eq!(sources.primary().unwrap().reference_ids().unwrap().len(), 1);
}

#[test]
fn corrupt_source_is_skipped() {
    let entry = stored(3, Value::text("ok"));

    let mut broken = StorageBackend::new(MemoryStore::new(), "broken");
    broken.set_reference(&entry).unwrap();
    let key = broken.store().keys_with_prefix("broken::ref::").unwrap()[0].clone();
    broken.store_mut().set(&key, Vec::new()).unwrap();

    let mut healthy = StorageBackend::new(MemoryStore::new(), "healthy");
    healthy.set_reference(&entry).unwrap();

    let mut sources = StorageSources::new();
    sources.add(Box::new(broken), 5);
    sources.add(Box::new(healthy), 1);

    assert_eq!(sources.get_reference(&entry.reference).unwrap(), entry);
}

#[test]
fn items_and_state_do_not_collide() {
    let mut backend = StorageBackend::new(MemoryStore::new(), "ns");
    backend.set_item("session", &Value::Int(1)).unwrap();
    backend.set_state("session", &Value::Int(2)).unwrap();

    assert_eq!(backend.get_item("session").unwrap(), Some(Value::Int(1)));
    assert_eq!(backend.get_state("session").unwrap(), Some(Value::Int(2)));
    assert_eq!(backend.item_keys().unwrap(), vec!["session".to_string()]);
    assert!(backend.remove_item("session").unwrap());
    assert!(!backend.remove_item("session").unwrap());
}
