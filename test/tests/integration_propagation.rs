/// Integration tests for update propagation
/// Origin changes fan out to subscribers, replica changes go to the origin
/// and on to the other subscribers, and nobody receives its own change back

use std::sync::{Arc, Mutex};

use refsync_runtime::{
    shared::{ObserverControl, ReferenceOptions, UpdateSource, Value},
    RuntimeEvent,
};
use refsync_shared::UpdateAction;
use refsync_test::{assert_value, init_logging, TestNetwork};

#[test]
fn origin_changes_coalesce_per_property() {
    init_logging();
    let mut net = TestNetwork::new();
    let origin = net.add_node("origin");
    let subscriber = net.add_node("subscriber");
    net.settle();

    let id = net
        .node_mut(origin)
        .registry_mut()
        .create(Value::map([("a", Value::Int(1))]), ReferenceOptions::new())
        .unwrap();
    net.load(subscriber, &id).unwrap();

    let subscriber_endpoint = net.endpoint(subscriber);
    {
        let registry = net.node_mut(origin).registry_mut();
        registry.set_property(&id, "a", Value::Int(2)).unwrap();
        assert_eq!(registry.property(&id, "a").unwrap(), Value::Int(2));
        assert_eq!(registry.scheduler().pending_count(&subscriber_endpoint), 1);

        registry.set_property(&id, "a", Value::Int(3)).unwrap();
        let pending = registry.scheduler().pending_for(&subscriber_endpoint);
        assert_eq!(pending.len(), 1);
        assert_eq!(
            pending[0].action,
            UpdateAction::SetProperty {
                key: "a".into(),
                value: Value::Int(3),
            }
        );
    }

    net.settle();
    assert_value!(net, subscriber, id, Value::map([("a", Value::Int(3))]));
}

#[test]
fn list_changes_keep_their_order() {
    init_logging();
    let mut net = TestNetwork::new();
    let origin = net.add_node("origin");
    let subscriber = net.add_node("subscriber");
    net.settle();

    let id = net
        .node_mut(origin)
        .registry_mut()
        .create(Value::List(Vec::new()), ReferenceOptions::new())
        .unwrap();
    net.load(subscriber, &id).unwrap();

    let subscriber_endpoint = net.endpoint(subscriber);
    {
        let registry = net.node_mut(origin).registry_mut();
        registry.add_element(&id, Value::Int(1)).unwrap();
        registry.add_element(&id, Value::Int(2)).unwrap();
        registry.remove_element(&id, 0).unwrap();
        // element operations are never merged
        assert_eq!(registry.scheduler().pending_count(&subscriber_endpoint), 3);
    }

    net.settle();
    assert_value!(net, subscriber, id, Value::List(vec![Value::Int(2)]));
}

#[test]
fn replica_changes_reach_other_subscribers_without_echo() {
    init_logging();
    let mut net = TestNetwork::new();
    let alice = net.add_node("alice");
    let bob = net.add_node("bob");
    let carol = net.add_node("carol");
    net.settle();

    let id = net
        .node_mut(alice)
        .registry_mut()
        .create(Value::map([("a", Value::Int(1))]), ReferenceOptions::new())
        .unwrap();
    net.load(bob, &id).unwrap();
    net.load(carol, &id).unwrap();

    let alice_endpoint = net.endpoint(alice);
    let bob_endpoint = net.endpoint(bob);
    let carol_endpoint = net.endpoint(carol);

    net.node_mut(bob)
        .registry_mut()
        .set_property(&id, "a", Value::Int(5))
        .unwrap();
    assert_eq!(
        net.node(bob).registry().scheduler().pending_count(&alice_endpoint),
        1
    );

    // step by hand so the origin's queue can be inspected before it flushes
    let now = net.now();
    net.node_mut(bob).flush_now();
    net.node_mut(bob).send_all_updates(&now);
    net.node_mut(alice).receive_all_packets(&now);

    assert_value!(net, alice, id, Value::map([("a", Value::Int(5))]));
    let scheduler = net.node(alice).registry().scheduler();
    assert_eq!(scheduler.pending_count(&bob_endpoint), 0);
    assert_eq!(scheduler.pending_count(&carol_endpoint), 1);

    net.settle();
    assert_value!(net, carol, id, Value::map([("a", Value::Int(5))]));
    assert_value!(net, bob, id, Value::map([("a", Value::Int(5))]));
    assert!(!net
        .events(alice)
        .iter()
        .any(|event| matches!(event, RuntimeEvent::Error(_))));
}

#[test]
fn observers_see_remote_source() {
    init_logging();
    let mut net = TestNetwork::new();
    let alice = net.add_node("alice");
    let bob = net.add_node("bob");
    net.settle();

    let id = net
        .node_mut(alice)
        .registry_mut()
        .create(Value::map([("a", Value::Int(1))]), ReferenceOptions::new())
        .unwrap();
    net.load(bob, &id).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    net.node_mut(bob)
        .registry_mut()
        .observe_property(&id, "a", move |change| {
            sink.lock().unwrap().push((change.value.clone(), change.source));
            ObserverControl::Continue
        })
        .unwrap();

    net.node_mut(alice)
        .registry_mut()
        .set_property(&id, "a", Value::Int(9))
        .unwrap();
    net.settle();

    let alice_endpoint = net.endpoint(alice);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![(Some(Value::Int(9)), UpdateSource::Remote(alice_endpoint))]
    );
}

#[test]
fn batches_wait_for_flush_interval() {
    init_logging();
    let mut net = TestNetwork::new();
    let alice = net.add_node("alice");
    let bob = net.add_node("bob");
    net.settle();

    let id = net
        .node_mut(alice)
        .registry_mut()
        .create(Value::Int(1), ReferenceOptions::new())
        .unwrap();
    net.load(bob, &id).unwrap();

    let bob_endpoint = net.endpoint(bob);
    net.node_mut(alice)
        .registry_mut()
        .set_value(&id, Value::Int(2))
        .unwrap();

    let now = net.now();
    net.node_mut(alice).send_all_updates(&now);
    assert_eq!(
        net.node(alice).registry().scheduler().pending_count(&bob_endpoint),
        1
    );

    let interval = net.node(alice).config().flush_interval;
    net.advance(interval);
    let now = net.now();
    net.node_mut(alice).send_all_updates(&now);
    assert_eq!(
        net.node(alice).registry().scheduler().pending_count(&bob_endpoint),
        0
    );

    net.settle();
    assert_value!(net, bob, id, Value::Int(2));
}

fn ints(values: &[i64]) -> Value {
    Value::List(values.iter().map(|value| Value::Int(*value)).collect())
}

#[test]
fn replica_matches_origin_after_mixed_list_changes() {
    init_logging();
    let mut net = TestNetwork::new();
    let origin = net.add_node("origin");
    let subscriber = net.add_node("subscriber");
    net.settle();

    let id = net
        .node_mut(origin)
        .registry_mut()
        .create(ints(&[10, 20, 30]), ReferenceOptions::new())
        .unwrap();
    net.load(subscriber, &id).unwrap();

    // index writes on both sides of structural changes, in one batch
    {
        let registry = net.node_mut(origin).registry_mut();
        registry.set_property(&id, 1usize, Value::Int(7)).unwrap();
        registry.remove_element(&id, 0).unwrap();
        registry.set_property(&id, 1usize, Value::Int(8)).unwrap();
        registry
            .splice_range(&id, 0, 1, vec![Value::Int(5), Value::Int(6)])
            .unwrap();
        registry.set_property(&id, 0usize, Value::Int(9)).unwrap();
        registry.set_property(&id, 0usize, Value::Int(4)).unwrap();
    }
    net.settle();
    assert_value!(net, origin, id, ints(&[4, 6, 8]));
    assert_value!(net, subscriber, id, ints(&[4, 6, 8]));

    // a whole value followed by element changes
    {
        let registry = net.node_mut(origin).registry_mut();
        registry.add_element(&id, Value::Int(0)).unwrap();
        registry.set_value(&id, ints(&[1])).unwrap();
        registry.add_element(&id, Value::Int(2)).unwrap();
        registry.set_property(&id, 0usize, Value::Int(3)).unwrap();
    }
    net.settle();
    assert_value!(net, origin, id, ints(&[3, 2]));
    assert_value!(net, subscriber, id, ints(&[3, 2]));
}

#[test]
fn replica_changes_in_one_batch_match_at_the_origin() {
    init_logging();
    let mut net = TestNetwork::new();
    let origin = net.add_node("origin");
    let writer = net.add_node("writer");
    let reader = net.add_node("reader");
    net.settle();

    let id = net
        .node_mut(origin)
        .registry_mut()
        .create(ints(&[1, 2, 3]), ReferenceOptions::new())
        .unwrap();
    net.load(writer, &id).unwrap();
    net.load(reader, &id).unwrap();

    {
        let registry = net.node_mut(writer).registry_mut();
        registry.set_value(&id, ints(&[0, 0])).unwrap();
        registry.add_element(&id, Value::Int(5)).unwrap();
        registry.set_property(&id, 2usize, Value::Int(6)).unwrap();
        registry.remove_element(&id, 0).unwrap();
        registry.set_property(&id, 0usize, Value::Int(7)).unwrap();
    }
    net.settle();

    let expected = ints(&[7, 6]);
    assert_value!(net, writer, id, expected.clone());
    assert_value!(net, origin, id, expected.clone());
    assert_value!(net, reader, id, expected);
}
