/// Integration tests for persistence
/// Synced references are written to storage, survive a restart of their
/// origin and are rehydrated when a subscriber asks for them

use refsync_runtime::{
    shared::{PersistenceMode, ReferenceOptions, SyncError, Value},
    FileStore, RuntimeConfig,
};
use refsync_shared::ProtocolError;
use refsync_test::{assert_missing, assert_subscribers, assert_value, init_logging, SharedStore, TestNetwork};

fn profile() -> Value {
    Value::map([("name", Value::text("ada")), ("level", Value::Int(3))])
}

#[test]
fn remote_subscribe_rehydrates_stored_reference() {
    init_logging();
    let mut net = TestNetwork::new();
    let alice = net.add_node("alice");
    let bob = net.add_node("bob");
    let store = SharedStore::new();
    net.node_mut(alice).add_storage(store.clone(), 0);

    let id = {
        let registry = net.node_mut(alice).registry_mut();
        let id = registry
            .create(profile(), ReferenceOptions::new().persistent().label("profile"))
            .unwrap();
        registry.sync_reference(&id).unwrap();
        id
    };
    assert!(!store.is_empty());

    net.restart(alice).add_storage(store.clone(), 0);
    assert_missing!(net, alice, id);
    net.settle();

    assert_eq!(net.load(bob, &id), Ok(id));
    assert_value!(net, bob, id, profile());
    assert_value!(net, alice, id, profile());
    assert_subscribers!(net, alice, id, 1);
    assert_eq!(net.node(alice).registry().get_by_label("profile"), Some(id));
}

#[test]
fn deleted_reference_is_not_found() {
    init_logging();
    let mut net = TestNetwork::new();
    let alice = net.add_node("alice");
    let bob = net.add_node("bob");
    net.settle();

    let id = {
        let registry = net.node_mut(alice).registry_mut();
        let id = registry
            .create(profile(), ReferenceOptions::new())
            .unwrap();
        registry.delete(&id);
        id
    };

    match net.load(bob, &id) {
        Err(SyncError::Protocol(ProtocolError::Refused { reason, .. })) => {
            assert_eq!(reason, "not found")
        }
        other => panic!("Expected a refusal, got {:?}", other),
    }
    assert_missing!(net, bob, id);
}

#[test]
fn save_on_shutdown_writes_once() {
    init_logging();
    let mut net = TestNetwork::with_config(RuntimeConfig {
        persistence: PersistenceMode::SaveOnShutdown,
        ..RuntimeConfig::default()
    });
    let alice = net.add_node("alice");
    let store = SharedStore::new();
    net.node_mut(alice).add_storage(store.clone(), 0);

    let id = {
        let registry = net.node_mut(alice).registry_mut();
        let id = registry
            .create(profile(), ReferenceOptions::new().persistent())
            .unwrap();
        registry.sync_reference(&id).unwrap();
        registry.set_property(&id, "level", Value::Int(4)).unwrap();
        id
    };
    assert!(store.is_empty());

    net.restart(alice).add_storage(store.clone(), 0);
    assert!(!store.is_empty());

    assert_eq!(net.load(alice, &id), Ok(id));
    assert_value!(
        net,
        alice,
        id,
        Value::map([("name", Value::text("ada")), ("level", Value::Int(4))])
    );
}

#[test]
fn linked_references_are_saved_with_their_parent() {
    init_logging();
    let mut net = TestNetwork::new();
    let alice = net.add_node("alice");
    let store = SharedStore::new();
    net.node_mut(alice).add_storage(store.clone(), 0);

    let (parent, child) = {
        let registry = net.node_mut(alice).registry_mut();
        let child = registry
            .create(Value::text("leaf"), ReferenceOptions::new())
            .unwrap();
        let parent = registry
            .create(
                Value::map([("child", Value::Reference(child))]),
                ReferenceOptions::new().persistent(),
            )
            .unwrap();
        registry.sync_reference(&parent).unwrap();
        (parent, child)
    };

    net.restart(alice).add_storage(store.clone(), 0);

    assert_eq!(net.load(alice, &child), Ok(child));
    assert_value!(net, alice, child, Value::text("leaf"));
    assert_eq!(net.load(alice, &parent), Ok(parent));
}

#[test]
fn file_store_survives_restart() {
    init_logging();
    let directory =
        std::env::temp_dir().join(format!("refsync-persistence-{:016x}", unique_suffix()));

    let mut net = TestNetwork::new();
    let alice = net.add_node("alice");
    net.node_mut(alice)
        .add_storage(FileStore::open(&directory).unwrap(), 0);

    let id = {
        let registry = net.node_mut(alice).registry_mut();
        let id = registry
            .create(profile(), ReferenceOptions::new().persistent())
            .unwrap();
        registry.sync_reference(&id).unwrap();
        id
    };

    net.restart(alice)
        .add_storage(FileStore::open(&directory).unwrap(), 0);
    assert_eq!(net.load(alice, &id), Ok(id));
    assert_value!(net, alice, id, profile());

    std::fs::remove_dir_all(directory).unwrap();
}

#[test]
fn items_and_state_are_read_by_priority() {
    init_logging();
    let mut net = TestNetwork::new();
    let alice = net.add_node("alice");
    let defaults = SharedStore::new();
    let user = SharedStore::new();
    net.node_mut(alice).add_storage(defaults.clone(), 0);
    net.node_mut(alice).add_storage(user.clone(), 10);

    let node = net.node_mut(alice);
    node.set_item("theme", &Value::text("light")).unwrap();
    node.set_state("last-session", &Value::Int(7)).unwrap();
    assert!(defaults.is_empty());

    // a restart with the sources swapped shows the lower copy is shadowed
    let node = net.restart(alice);
    node.add_storage(user.clone(), 0);
    node.add_storage(defaults.clone(), 10);
    node.set_item("theme", &Value::text("dark")).unwrap();
    node.set_item("lang", &Value::text("en")).unwrap();

    assert_eq!(node.get_item("theme"), Some(Value::text("dark")));
    assert_eq!(node.get_state("last-session"), Some(Value::Int(7)));
    assert!(node.has_item("lang"));

    assert_eq!(node.remove_item("theme"), Ok(true));
    assert!(!node.has_item("theme"));
    assert_eq!(node.get_item("theme"), None);

    assert_eq!(node.clear_storage(), Ok(2));
    assert!(!node.has_item("lang"));
    assert_eq!(node.get_state("last-session"), None);
    assert!(defaults.is_empty());
    assert!(user.is_empty());
}

#[test]
fn clearing_storage_forgets_synced_references() {
    init_logging();
    let mut net = TestNetwork::new();
    let alice = net.add_node("alice");
    let store = SharedStore::new();
    net.node_mut(alice).add_storage(store.clone(), 0);

    let id = {
        let registry = net.node_mut(alice).registry_mut();
        let id = registry
            .create(profile(), ReferenceOptions::new().persistent())
            .unwrap();
        registry.sync_reference(&id).unwrap();
        id
    };
    assert!(net.node(alice).registry().storage().has_reference(&id));

    assert_eq!(net.node_mut(alice).clear_storage(), Ok(1));
    assert!(store.is_empty());
    assert_value!(net, alice, id, profile());

    net.restart(alice).add_storage(store.clone(), 0);
    assert!(net.load(alice, &id).is_err());
}

fn unique_suffix() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos()
}
