//! Property-based tests for the PoET engine

use poet_engine::*;
use poet_primitives::constants::{FIELD_SIGNATURE, RATIO_FIELDS};
use poet_primitives::to_canonical_bytes;
use proptest::prelude::*;

fn arb_certificate() -> impl Strategy<Value = WaitCertificate> {
    (0.0f64..1.0e4, prop::array::uniform32(any::<u8>())).prop_map(|(duration, sig)| WaitCertificate {
        request_time: 0.0,
        duration,
        local_mean: 30.0,
        previous_certificate_id: "00000000000000aa".into(),
        validator_address: "ab".repeat(20),
        block_hash: "cd".repeat(32),
        signature: hex::encode(sig),
    })
}

// Property test: key insertion order never reaches the signed bytes
proptest! {
    #[test]
    fn canonical_bytes_ignore_insertion_order(
        entries in prop::collection::btree_map("[a-z_]{1,12}", -1.0e9f64..1.0e9, 1..10)
    ) {
        let forward: Vec<(String, Value)> =
            entries.iter().map(|(k, v)| (k.clone(), Value::Float(*v))).collect();
        let mut shuffled = forward.clone();
        shuffled.rotate_left(forward.len() / 2);
        prop_assert_eq!(
            to_canonical_bytes(&Value::Map(forward), RATIO_FIELDS).expect("canonical"),
            to_canonical_bytes(&Value::Map(shuffled), RATIO_FIELDS).expect("canonical")
        );
    }
}

// Property test: integer and float ratios encode identically
proptest! {
    #[test]
    fn ratio_fields_encode_integers_as_floats(n in -1_000_000i64..1_000_000) {
        #[allow(clippy::cast_precision_loss)]
        let as_float = Value::map().with("local_mean", n as f64);
        let as_int = Value::map().with("local_mean", n);
        prop_assert_eq!(
            to_canonical_bytes(&as_int, RATIO_FIELDS).expect("canonical"),
            to_canonical_bytes(&as_float, RATIO_FIELDS).expect("canonical")
        );
    }
}

// Property test: sign/verify round-trip; any flipped signature byte fails
proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]
    #[test]
    fn sign_verify_and_flip(
        secret in prop::array::uniform32(any::<u8>()),
        value in any::<i64>(),
        text in "[a-z]{0,16}",
        flip in 0usize..64,
    ) {
        let signer = Signer::from_bytes(&secret);
        let obj = Value::map().with("value", value).with("text", text).with("nonce", 1.0f64);
        let signed = signer.sign(&obj, FIELD_SIGNATURE, RATIO_FIELDS).expect("sign");
        prop_assert!(signer::verify(&signer.verifying_key(), &signed, FIELD_SIGNATURE, RATIO_FIELDS));

        let mut raw = signer::signature_from_hex(
            signed.get(FIELD_SIGNATURE).and_then(Value::as_str).expect("signature"),
        ).expect("hex");
        raw[flip] ^= 0x01;
        let mut tampered = signed.clone();
        tampered.insert(FIELD_SIGNATURE, hex::encode(raw));
        prop_assert!(!signer::verify(&signer.verifying_key(), &tampered, FIELD_SIGNATURE, RATIO_FIELDS));
    }
}

// Property test: betterness is a total order that does not depend on argument order
proptest! {
    #[test]
    fn compare_better_is_consistent(a in arb_certificate(), b in arb_certificate(), c in arb_certificate()) {
        let ab = compare_better(&a, &b).clone();
        let ba = compare_better(&b, &a).clone();
        if a.better_order(&b) != std::cmp::Ordering::Equal {
            prop_assert_eq!(&ab, &ba);
        }
        // winner of three is the same whichever pair is compared first
        let left = compare_better(compare_better(&a, &b), &c).clone();
        let right = compare_better(&a, compare_better(&b, &c)).clone();
        prop_assert_eq!(left.better_order(&right), std::cmp::Ordering::Equal);
        prop_assert!(left.duration <= a.duration && left.duration <= b.duration && left.duration <= c.duration);
    }
}
