//! Property-Based Tests for the Cache
//!
//! # Test Properties
//!
//! 1. **Codec Roundtrip**: decode(encode(v)) = v, compressed or not
//! 2. **Key Determinism**: keyword order never changes the key
//! 3. **Key Separation**: different arguments give different keys
//! 4. **Garbage Tolerance**: decoding arbitrary bytes fails cleanly

#![cfg(test)]

use std::collections::BTreeMap;

use proptest::prelude::*;

use super::codec::{Codec, CompressionConfig};
use super::key::{derive_key, CacheKey, CallArgs, KEY_LEN};

// =============================================================================
// Property Strategies
// =============================================================================

/// Keyword arguments with distinct names
fn kwargs_strategy() -> impl Strategy<Value = BTreeMap<String, i64>> {
    prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..8)
}

/// Values large enough to be compressed some of the time
fn document_strategy() -> impl Strategy<Value = Vec<(String, Vec<u32>)>> {
    prop::collection::vec(("[a-z ]{0,64}", prop::collection::vec(any::<u32>(), 0..32)), 0..24)
}

// =============================================================================
// Codec Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: every serializable value survives a roundtrip
    #[test]
    fn prop_codec_roundtrip(doc in document_strategy(), min_size in 0usize..512) {
        let codec = Codec::with_config(CompressionConfig {
            min_size_bytes: min_size,
            ..Default::default()
        });

        let encoded = codec.encode(&doc).unwrap();
        let decoded: Vec<(String, Vec<u32>)> = codec.decode(&encoded.bytes).unwrap();
        prop_assert_eq!(decoded, doc);
    }

    /// Property: arbitrary bytes never panic the decoder
    #[test]
    fn prop_decode_garbage(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let codec = Codec::new();
        let _ = codec.decode::<serde_json::Value>(&bytes);
    }
}

// =============================================================================
// Key Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: keyword insertion order does not matter
    #[test]
    fn prop_key_order_independent(kwargs in kwargs_strategy(), positional in any::<Vec<i32>>()) {
        let mut forward = CallArgs::new();
        let mut backward = CallArgs::new();
        for p in &positional {
            forward = forward.arg(p);
            backward = backward.arg(p);
        }
        for (name, value) in kwargs.iter() {
            forward = forward.kwarg(name.clone(), value);
        }
        for (name, value) in kwargs.iter().rev() {
            backward = backward.kwarg(name.clone(), value);
        }

        let a = derive_key("op", &forward).unwrap();
        let b = derive_key("op", &backward).unwrap();
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.as_str().len(), KEY_LEN);
        prop_assert!(CacheKey::from_hex(a.as_str()).is_ok());
    }

    /// Property: different positional values give different keys
    #[test]
    fn prop_key_separates_arguments(x in any::<i64>(), y in any::<i64>()) {
        prop_assume!(x != y);
        let a = derive_key("op", &CallArgs::new().arg(&x)).unwrap();
        let b = derive_key("op", &CallArgs::new().arg(&y)).unwrap();
        prop_assert_ne!(a, b);
    }
}
