/// Integration tests for subscribing to remote references
/// A replica is created from the origin's snapshot, and the origin tracks
/// the subscriber until it unsubscribes

use refsync_runtime::{
    shared::{LoadScope, ReferenceOptions, TypeSchema, Value, ValueType},
    LoadStatus, RuntimeEvent,
};
use refsync_test::{assert_missing, assert_subscribers, assert_value, init_logging, TestNetwork};

fn scores() -> Value {
    Value::map([("a", Value::Int(1)), ("b", Value::text("two"))])
}

#[test]
fn subscribe_delivers_snapshot() {
    init_logging();
    let mut net = TestNetwork::new();
    let alice = net.add_node("alice");
    let bob = net.add_node("bob");
    net.settle();

    let id = net
        .node_mut(alice)
        .registry_mut()
        .create(scores(), ReferenceOptions::new().label("scores"))
        .unwrap();

    assert_eq!(net.load(bob, &id), Ok(id));

    assert_value!(net, bob, id, scores());
    let replica = net.node(bob).registry().get(&id).unwrap();
    assert!(!replica.is_origin());
    assert_eq!(*replica.origin(), net.endpoint(alice));
    assert_eq!(net.node(bob).registry().get_by_label("scores"), Some(id));
    assert_subscribers!(net, alice, id, 1);

    let events = net.events(bob);
    assert!(events.contains(&RuntimeEvent::ReferenceAdded(id)));
    assert!(events
        .iter()
        .any(|event| matches!(event, RuntimeEvent::LoadCompleted { reference, .. } if *reference == id)));
}

#[test]
fn local_references_load_at_once() {
    init_logging();
    let mut net = TestNetwork::new();
    let alice = net.add_node("alice");

    let id = net
        .node_mut(alice)
        .registry_mut()
        .create(Value::Int(4), ReferenceOptions::new())
        .unwrap();
    let now = net.now();
    assert_eq!(
        net.node_mut(alice).load(&mut LoadScope::new(), &id, &now),
        Ok(LoadStatus::Ready(id))
    );
}

#[test]
fn hidden_fields_stay_at_origin() {
    init_logging();
    let mut net = TestNetwork::new();
    let alice = net.add_node("alice");
    let bob = net.add_node("bob");
    net.settle();

    let id = {
        let registry = net.node_mut(alice).registry_mut();
        registry.register_schema(
            TypeSchema::define("account")
                .field("name", ValueType::Text)
                .hidden_field("secret", ValueType::Text),
        );
        registry
            .create(
                Value::map([("name", Value::text("ada")), ("secret", Value::text("hunter2"))]),
                ReferenceOptions::new().typed(ValueType::named("account")),
            )
            .unwrap()
    };

    net.load(bob, &id).unwrap();
    assert_value!(net, bob, id, Value::map([("name", Value::text("ada"))]));

    let bob_endpoint = net.endpoint(bob);
    let registry = net.node_mut(alice).registry_mut();
    registry.set_property(&id, "secret", Value::text("swordfish")).unwrap();
    assert_eq!(registry.scheduler().pending_count(&bob_endpoint), 0);
    registry.set_property(&id, "name", Value::text("grace")).unwrap();
    assert_eq!(registry.scheduler().pending_count(&bob_endpoint), 1);

    net.settle();
    assert_value!(net, bob, id, Value::map([("name", Value::text("grace"))]));

    // whole-value writes neither leak nor lose the hidden field
    net.node_mut(alice)
        .registry_mut()
        .set_value(
            &id,
            Value::map([("name", Value::text("ada")), ("secret", Value::text("letmein"))]),
        )
        .unwrap();
    net.settle();
    assert_value!(net, bob, id, Value::map([("name", Value::text("ada"))]));

    net.node_mut(bob)
        .registry_mut()
        .set_value(&id, Value::map([("name", Value::text("lovelace"))]))
        .unwrap();
    net.settle();
    assert_value!(
        net,
        alice,
        id,
        Value::map([("name", Value::text("lovelace")), ("secret", Value::text("letmein"))])
    );
    assert_value!(net, bob, id, Value::map([("name", Value::text("lovelace"))]));
}

#[test]
fn concurrent_loads_share_one_request() {
    init_logging();
    let mut net = TestNetwork::new();
    let alice = net.add_node("alice");
    let bob = net.add_node("bob");
    net.settle();

    let id = net
        .node_mut(alice)
        .registry_mut()
        .create(scores(), ReferenceOptions::new())
        .unwrap();

    let now = net.now();
    let first = net.node_mut(bob).load(&mut LoadScope::new(), &id, &now).unwrap();
    let second = net.node_mut(bob).load(&mut LoadScope::new(), &id, &now).unwrap();
    assert_eq!(first, second);
    let LoadStatus::Pending(key) = first else {
        panic!("Expected a pending load, got {:?}", first);
    };

    net.settle();
    assert_eq!(net.node_mut(bob).poll_load(&key, &now), Some(Ok(id)));
    assert_subscribers!(net, alice, id, 1);
}

#[test]
fn nested_links_load_lazily() {
    init_logging();
    let mut net = TestNetwork::new();
    let alice = net.add_node("alice");
    let bob = net.add_node("bob");
    net.settle();

    let (parent, child) = {
        let registry = net.node_mut(alice).registry_mut();
        let child = registry
            .create(Value::text("leaf"), ReferenceOptions::new())
            .unwrap();
        let parent = registry
            .create(
                Value::map([("child", Value::Reference(child))]),
                ReferenceOptions::new(),
            )
            .unwrap();
        (parent, child)
    };

    net.load(bob, &parent).unwrap();
    assert_value!(net, bob, parent, Value::map([("child", Value::Reference(child))]));
    assert_missing!(net, bob, child);

    net.load(bob, &child).unwrap();
    assert_value!(net, bob, child, Value::text("leaf"));
    assert_subscribers!(net, alice, child, 1);
}

#[test]
fn unsubscribe_drops_replica_and_subscriber() {
    init_logging();
    let mut net = TestNetwork::new();
    let alice = net.add_node("alice");
    let bob = net.add_node("bob");
    net.settle();

    let id = net
        .node_mut(alice)
        .registry_mut()
        .create(scores(), ReferenceOptions::new())
        .unwrap();
    net.load(bob, &id).unwrap();
    assert_subscribers!(net, alice, id, 1);

    let now = net.now();
    net.node_mut(bob).unsubscribe(&id, &now).unwrap();
    assert_missing!(net, bob, id);

    net.settle();
    assert_subscribers!(net, alice, id, 0);

    // later changes are not queued for the former subscriber
    let bob_endpoint = net.endpoint(bob);
    let registry = net.node_mut(alice).registry_mut();
    registry.set_property(&id, "a", Value::Int(2)).unwrap();
    assert_eq!(registry.scheduler().pending_count(&bob_endpoint), 0);
}
