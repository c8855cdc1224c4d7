/// Integration tests for routing
/// Presence announcements, forwarding through intermediate endpoints,
/// relayed virtual links, the hop ceiling and reconnection

use std::time::Duration;

use refsync_runtime::{
    shared::{Endpoint, LoadScope, ReferenceId, ReferenceOptions, Value},
    transport::{IndirectRoute, InitArgs, RELAYED},
    LoadStatus, RuntimeConfig, RuntimeEvent,
};
use refsync_test::{assert_subscribers, assert_value, init_logging, TestNetwork};

fn discovered(events: &[RuntimeEvent]) -> Vec<Endpoint> {
    events
        .iter()
        .filter_map(|event| match event {
            RuntimeEvent::PeerDiscovered(endpoint) => Some(*endpoint),
            _ => None,
        })
        .collect()
}

/// Records that `to` is reached through `via` on `node`.
fn route_via(net: &mut TestNetwork, node: usize, to: usize, via: usize) {
    let to = net.endpoint(to);
    let via = net.endpoint(via);
    net.node_mut(node)
        .transports_mut()
        .record_indirect(&to, IndirectRoute::Via(via));
}

/// `a - m1 - m2 - c` over point-to-point links. `c` owns the returned
/// reference.
fn chain(config: RuntimeConfig) -> (TestNetwork, usize, usize, ReferenceId) {
    let mut net = TestNetwork::with_config(config);
    let a = net.add_isolated_node("a");
    let m1 = net.add_isolated_node("m1");
    let m2 = net.add_isolated_node("m2");
    let c = net.add_isolated_node("c");
    net.link(a, m1);
    net.link(m1, m2);
    net.link(m2, c);

    route_via(&mut net, a, c, m1);
    route_via(&mut net, m1, c, m2);
    route_via(&mut net, c, a, m2);
    route_via(&mut net, m2, a, m1);
    net.settle();

    let id = net
        .node_mut(c)
        .registry_mut()
        .create(Value::text("far away"), ReferenceOptions::new())
        .unwrap();
    (net, a, c, id)
}

#[test]
fn hello_discovers_peers_both_ways() {
    init_logging();
    let mut net = TestNetwork::new();
    let alice = net.add_node("alice");
    let bob = net.add_node("bob");
    net.settle();

    let alice_endpoint = net.endpoint(alice);
    let bob_endpoint = net.endpoint(bob);
    assert_eq!(discovered(&net.events(alice)), vec![bob_endpoint]);
    assert_eq!(discovered(&net.events(bob)), vec![alice_endpoint]);
    assert!(net.node(alice).transports().has_route(&bob_endpoint));
}

#[test]
fn late_joiner_discovers_everyone_once() {
    init_logging();
    let mut net = TestNetwork::new();
    let alice = net.add_node("alice");
    let bob = net.add_node("bob");
    net.settle();
    let carol = net.add_node("carol");
    net.settle();

    let mut found = discovered(&net.events(carol));
    found.sort();
    let mut expected = vec![net.endpoint(alice), net.endpoint(bob)];
    expected.sort();
    assert_eq!(found, expected);
}

#[test]
fn frames_are_forwarded_along_a_chain() {
    init_logging();
    let (mut net, a, c, id) = chain(RuntimeConfig::default());

    assert_eq!(net.load(a, &id), Ok(id));
    assert_value!(net, a, id, Value::text("far away"));
    assert_subscribers!(net, c, id, 1);

    net.node_mut(c)
        .registry_mut()
        .set_value(&id, Value::text("closer"))
        .unwrap();
    net.settle();
    assert_value!(net, a, id, Value::text("closer"));
}

#[test]
fn frames_past_the_hop_ceiling_are_dropped() {
    init_logging();
    let config = RuntimeConfig {
        max_hops: 2,
        ..RuntimeConfig::default()
    };
    let (mut net, a, c, id) = chain(config);

    let now = net.now();
    let status = net.node_mut(a).load(&mut LoadScope::new(), &id, &now).unwrap();
    let LoadStatus::Pending(key) = status else {
        panic!("Expected a pending load, got {:?}", status);
    };
    net.settle();

    assert!(net.node(a).is_loading(&key));
    assert_subscribers!(net, c, id, 0);
}

#[test]
fn relayed_link_tunnels_through_relay() {
    init_logging();
    let mut net = TestNetwork::new();
    let alice = net.add_isolated_node("alice");
    let relay = net.add_isolated_node("relay");
    let carol = net.add_isolated_node("carol");
    let (to_relay, _) = net.link(alice, relay);
    net.link(relay, carol);

    let relay_endpoint = net.endpoint(relay);
    let carol_endpoint = net.endpoint(carol);
    let mut args = InitArgs::new();
    args.insert("relay".to_string(), relay_endpoint.to_string());
    let now = net.now();
    let virtual_key = net
        .node_mut(alice)
        .connect(RELAYED, Some(&carol_endpoint), &args, false, &now)
        .unwrap();
    route_via(&mut net, carol, alice, relay);

    // the virtual interface only declares the route
    let route = net.node(alice).transports().route_for(&carol_endpoint);
    assert_eq!(route, Some((to_relay, relay_endpoint)));
    assert_ne!(route.map(|(key, _)| key), Some(virtual_key));
    net.settle();

    let id = net
        .node_mut(carol)
        .registry_mut()
        .create(Value::Int(42), ReferenceOptions::new())
        .unwrap();
    assert_eq!(net.load(alice, &id), Ok(id));
    assert_value!(net, alice, id, Value::Int(42));
}

#[test]
fn reconnected_interface_announces_again() {
    init_logging();
    let mut net = TestNetwork::new();
    let alice = net.add_node("alice");
    let bob = net.add_node("bob");
    net.settle();
    net.events(alice);
    net.events(bob);

    let bob_endpoint = net.endpoint(bob);
    net.hub().set_online(&bob_endpoint, false);
    net.tick();
    assert!(net
        .events(bob)
        .iter()
        .any(|event| matches!(event, RuntimeEvent::InterfaceDisconnected(_))));

    net.hub().set_online(&bob_endpoint, true);
    // still backing off
    net.tick();
    assert!(!net
        .events(bob)
        .iter()
        .any(|event| matches!(event, RuntimeEvent::InterfaceConnected(_))));

    let backoff = net.node(bob).config().reconnect_backoff;
    net.advance(backoff + Duration::from_millis(1));
    net.settle();
    assert!(net
        .events(bob)
        .iter()
        .any(|event| matches!(event, RuntimeEvent::InterfaceConnected(_))));
    assert_eq!(discovered(&net.events(alice)), vec![bob_endpoint]);
}
