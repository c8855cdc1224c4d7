/// Tests for ReferenceId parsing and ReferenceIdGenerator
/// Covers malformed ids, static ids and the per-second counter overflow
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use refsync_shared::{
    AddressType, Endpoint, ReferenceId, ReferenceIdGenerator, ValueError, DEFAULT_ID_LENGTH,
};

fn fixed_clock(seconds: Arc<AtomicU32>) -> Box<dyn FnMut() -> u32 + Send> {
    Box::new(move || seconds.load(Ordering::SeqCst))
}

#[test]
fn parse_rejects_missing_prefix() {
    let result = "0102030405".parse::<ReferenceId>();

    match result {
        Err(ValueError::InvalidReferenceId { reason }) => assert!(reason.contains("'$'")),
        _ => panic!("Expected InvalidReferenceId error"),
    }
}

#[test]
fn parse_rejects_wrong_length() {
    let result = "$0102".parse::<ReferenceId>();
    assert!(matches!(result, Err(ValueError::InvalidReferenceId { .. })));
}

#[test]
fn parse_rejects_unknown_address_type() {
    let text = format!("${}", "ff".repeat(DEFAULT_ID_LENGTH));
    assert!(text.parse::<ReferenceId>().is_err());
}

#[test]
fn blockchain_and_public_tags_are_accepted() {
    let mut raw = vec![0xBCu8];
    raw.extend_from_slice(&[1u8; 17]);
    let id = ReferenceId::from_bytes(&raw).unwrap();
    assert_eq!(id.address_type(), AddressType::Blockchain);

    raw[0] = 5;
    assert_eq!(
        ReferenceId::from_bytes(&raw).unwrap().address_type(),
        AddressType::Public
    );
}

#[test]
fn static_ids_are_stable() {
    let alice = Endpoint::named("alice").with_instance(3);
    let first = ReferenceId::new_static(&alice, 1);
    let again = ReferenceId::new_static(&alice.with_instance(9), 1);

    assert_eq!(first, again);
    assert_ne!(first, ReferenceId::new_static(&alice, 2));
}

#[test]
fn counter_overflow_borrows_the_next_second() {
    let seconds = Arc::new(AtomicU32::new(100));
    let mut generator =
        ReferenceIdGenerator::with_clock(Endpoint::named("alice"), fixed_clock(seconds.clone()));

    let mut seen = HashSet::new();
    for _ in 0..256 {
        let id = generator.generate();
        assert_eq!(id.timestamp(), Some(100));
        assert!(seen.insert(id));
    }
    assert_eq!(generator.time_shift(), 0);

    let shifted = generator.generate();
    assert_eq!(shifted.timestamp(), Some(101));
    assert_eq!(shifted.counter(), Some(0));
    assert_eq!(generator.time_shift(), 1);
    assert!(seen.insert(shifted));

    // the real clock catches up with the borrowed second
    seconds.store(102, Ordering::SeqCst);
    let caught_up = generator.generate();
    assert_eq!(caught_up.timestamp(), Some(102));
    assert_eq!(generator.time_shift(), 0);
}

#[test]
fn generated_ids_name_their_origin() {
    let endpoint = Endpoint::named("bob").with_instance(11);
    let mut generator =
        ReferenceIdGenerator::with_clock(endpoint, fixed_clock(Arc::new(AtomicU32::new(7))));

    let id = generator.generate();
    assert_eq!(id.origin(), endpoint);
    assert_eq!(id.to_string().parse::<ReferenceId>().unwrap(), id);
}
