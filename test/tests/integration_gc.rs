/// Integration tests for garbage collection
/// Unreferenced replicas are reclaimed after the grace period and their
/// origin is told; subscribed, held and persistent references survive

use std::time::Duration;

use refsync_runtime::{
    shared::{ReferenceOptions, Value},
    RuntimeConfig, RuntimeEvent,
};
use refsync_test::{assert_missing, assert_subscribers, assert_value, init_logging, TestNetwork};

const GRACE: Duration = Duration::from_secs(1);

fn network() -> TestNetwork {
    TestNetwork::with_config(RuntimeConfig {
        gc_grace_period: GRACE,
        ..RuntimeConfig::default()
    })
}

#[test]
fn reclaimed_replica_unsubscribes_from_origin() {
    init_logging();
    let mut net = network();
    let alice = net.add_node("alice");
    let bob = net.add_node("bob");
    net.settle();

    let id = {
        let registry = net.node_mut(alice).registry_mut();
        let id = registry
            .create(Value::Int(1), ReferenceOptions::new())
            .unwrap();
        registry.hold(&id).unwrap();
        id
    };
    net.load(bob, &id).unwrap();
    assert_subscribers!(net, alice, id, 1);

    // the grace period starts on the next update
    net.tick();
    assert!(net.node(bob).registry().is_scheduled_for_collection(&id));
    net.events(bob);

    net.advance(GRACE);
    net.settle();

    assert_missing!(net, bob, id);
    assert!(net.events(bob).contains(&RuntimeEvent::ReferenceRemoved(id)));
    assert_subscribers!(net, alice, id, 0);
    assert_value!(net, alice, id, Value::Int(1));
}

#[test]
fn origin_keeps_subscribed_references() {
    init_logging();
    let mut net = network();
    let alice = net.add_node("alice");
    let bob = net.add_node("bob");
    net.settle();

    let id = net
        .node_mut(alice)
        .registry_mut()
        .create(Value::Int(1), ReferenceOptions::new())
        .unwrap();
    // bob holds its replica, so only the origin side is under test
    net.load(bob, &id).unwrap();
    net.node_mut(bob).registry_mut().hold(&id).unwrap();

    net.tick();
    net.advance(GRACE * 3);
    net.settle();

    assert_value!(net, alice, id, Value::Int(1));
    assert_value!(net, bob, id, Value::Int(1));
    assert!(!net.node(alice).registry().is_scheduled_for_collection(&id));
}

#[test]
fn held_and_persistent_references_survive() {
    init_logging();
    let mut net = network();
    let alice = net.add_node("alice");

    let (held, persistent, loose) = {
        let registry = net.node_mut(alice).registry_mut();
        let held = registry
            .create(Value::text("held"), ReferenceOptions::new())
            .unwrap();
        registry.hold(&held).unwrap();
        let persistent = registry
            .create(Value::text("persistent"), ReferenceOptions::new().persistent())
            .unwrap();
        let loose = registry
            .create(Value::text("loose"), ReferenceOptions::new())
            .unwrap();
        (held, persistent, loose)
    };

    net.tick();
    net.advance(GRACE);
    net.tick();

    assert_value!(net, alice, held, Value::text("held"));
    assert_value!(net, alice, persistent, Value::text("persistent"));
    assert_missing!(net, alice, loose);
}

#[test]
fn release_restarts_grace_period() {
    init_logging();
    let mut net = network();
    let alice = net.add_node("alice");

    let id = {
        let registry = net.node_mut(alice).registry_mut();
        let id = registry
            .create(Value::Int(7), ReferenceOptions::new())
            .unwrap();
        registry.hold(&id).unwrap();
        id
    };
    net.tick();
    net.advance(GRACE * 2);

    net.node_mut(alice).registry_mut().release(&id).unwrap();
    net.tick();
    // collectable since this tick only
    assert_value!(net, alice, id, Value::Int(7));

    net.advance(GRACE);
    net.tick();
    assert_missing!(net, alice, id);
}
