/// Assert that a node holds an initialized copy of a reference with the
/// given value
#[macro_export]
macro_rules! assert_value {
    ($network:expr, $node:expr, $id:expr, $expected:expr) => {
        match $network.node($node).registry().value(&$id) {
            Ok(value) => assert_eq!(
                *value, $expected,
                "Node {} has the wrong value for {}",
                $node, $id
            ),
            Err(err) => panic!("Node {} cannot read {}: {}", $node, $id, err),
        }
    };
}

/// Assert that a node does not know a reference at all
#[macro_export]
macro_rules! assert_missing {
    ($network:expr, $node:expr, $id:expr) => {
        assert!(
            !$network.node($node).registry().contains(&$id),
            "Node {} should not hold {}",
            $node,
            $id
        );
    };
}

/// Assert that an origin lists exactly `count` subscribers for a reference
#[macro_export]
macro_rules! assert_subscribers {
    ($network:expr, $node:expr, $id:expr, $count:expr) => {
        let count = $network
            .node($node)
            .registry()
            .get(&$id)
            .map(|reference| reference.subscriber_count())
            .unwrap_or(0);
        assert_eq!(
            count, $count,
            "Node {} should have {} subscriber(s) on {}",
            $node, $count, $id
        );
    };
}
