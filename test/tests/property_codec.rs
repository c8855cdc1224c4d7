/// PROPERTY-BASED TESTS: Wire codec invariants
///
/// Key invariants:
/// 1. Any value, however deeply nested, decodes to itself
/// 2. Envelopes carrying those values keep sender, receiver and payload
/// 3. Truncated frames are rejected instead of decoding to something else

use proptest::prelude::*;
use refsync_shared::{
    Codec, Endpoint, Envelope, Message, ReferenceId, SignedFrame, UpdateAction, UpdateBatch,
    UpdateFragment, Value, ValueKey, WireCodec,
};

fn endpoint_strategy() -> impl Strategy<Value = Endpoint> {
    ("[a-z]{1,12}", 1u64..u64::MAX).prop_map(|(name, instance)| Endpoint::named(&name).with_instance(instance))
}

fn reference_strategy() -> impl Strategy<Value = ReferenceId> {
    (endpoint_strategy(), any::<u32>()).prop_map(|(endpoint, unique)| ReferenceId::new_static(&endpoint, unique))
}

fn leaf_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        // NaN never equals itself
        any::<f64>()
            .prop_filter("finite", |float| !float.is_nan())
            .prop_map(Value::Float),
        ".{0,24}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
        reference_strategy().prop_map(Value::Reference),
        any::<u64>().prop_map(|raw| Value::Handle(ValueKey::new(raw))),
    ]
}

fn value_strategy() -> impl Strategy<Value = Value> {
    leaf_strategy().prop_recursive(4, 64, 8, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..8).prop_map(Value::List),
            prop::collection::btree_map("[a-z_]{1,10}", inner, 0..8).prop_map(Value::Map),
        ]
    })
}

proptest! {
    #[test]
    fn prop_values_decode_to_themselves(value in value_strategy()) {
        let bytes = WireCodec.encode_value(&value);
        prop_assert_eq!(WireCodec.decode_value(&bytes).unwrap(), value);
    }

    #[test]
    fn prop_update_envelopes_keep_routing_and_payload(
        sender in endpoint_strategy(),
        receiver in endpoint_strategy(),
        reference in reference_strategy(),
        values in prop::collection::vec(value_strategy(), 1..4),
    ) {
        let fragments = values
            .into_iter()
            .map(|value| UpdateFragment {
                reference,
                action: UpdateAction::SetValue(value),
                collapsed: true,
            })
            .collect();
        let envelope = Envelope::to(sender, receiver, Message::Update(UpdateBatch { fragments }));

        let bytes = WireCodec.encode_envelope(&envelope);
        let decoded = WireCodec.decode_envelope(&bytes).unwrap();
        prop_assert_eq!(decoded.sender, sender);
        prop_assert_eq!(decoded.receiver, Some(receiver));
        prop_assert_eq!(decoded, envelope);
    }

    #[test]
    fn prop_truncated_frames_are_rejected(
        sender in endpoint_strategy(),
        body in prop::collection::vec(any::<u8>(), 1..64),
        cut in 1usize..16,
    ) {
        let frame = SignedFrame {
            sender,
            receiver: None,
            hops: 0,
            signature: Vec::new(),
            body,
        };
        let bytes = WireCodec.encode_frame(&frame);
        prop_assume!(cut < bytes.len());

        prop_assert_eq!(WireCodec.decode_frame(&bytes).unwrap(), frame);
        let truncated = &bytes[..bytes.len() - cut];
        prop_assert!(WireCodec.decode_frame(truncated).is_err());
    }
}
