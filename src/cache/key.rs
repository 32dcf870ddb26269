//! Cache Key Derivation
//!
//! Turns an operation name plus its call arguments into a stable
//! SHA-256 key:
//!
//! ```text
//! hex(sha256(operation ":" canonical_json([positional, keyword])))
//! ```
//!
//! Keyword arguments are kept sorted by name and every nested JSON object is
//! rebuilt with sorted keys, so the same logical call always yields the same
//! key regardless of argument insertion order or process.
//!
//! # Example
//!
//! ```
//! use tiered_cache::cache::{derive_key, CallArgs};
//!
//! let a = CallArgs::new().arg(&4).kwarg("unit", &"cm").kwarg("round", &true);
//! let b = CallArgs::new().arg(&4).kwarg("round", &true).kwarg("unit", &"cm");
//!
//! assert_eq!(derive_key("area", &a).unwrap(), derive_key("area", &b).unwrap());
//! ```

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::finite::check_finite;
use crate::error::{Error, Result};

/// Length of a hex-encoded SHA-256 digest
pub const KEY_LEN: usize = 64;

/// Opaque fixed-length cache key
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Parse an externally supplied key
    ///
    /// Only strings shaped like a derived key are accepted: the disk tier
    /// uses the key verbatim as a file name.
    pub fn from_hex(raw: &str) -> Result<Self> {
        let valid = raw.len() == KEY_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(Error::InvalidKey(raw.to_string()))
        }
    }

    /// Get the key string
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Positional and keyword arguments of a cached call
///
/// Values are captured as JSON as they are added. A value that cannot be
/// serialized is remembered and reported by [`derive_key`].
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    positional: Vec<Value>,
    keyword: BTreeMap<String, Value>,
    invalid: Option<String>,
}

impl CallArgs {
    /// Create an empty argument list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument
    pub fn arg<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        let index = self.positional.len();
        match to_json(value) {
            Ok(v) => self.positional.push(v),
            Err(reason) => self.record_invalid(format!("positional argument {}: {}", index, reason)),
        }
        self
    }

    /// Set a keyword argument, replacing any earlier value for `name`
    pub fn kwarg<T: Serialize + ?Sized>(mut self, name: impl Into<String>, value: &T) -> Self {
        let name = name.into();
        match to_json(value) {
            Ok(v) => {
                self.keyword.insert(name, v);
            }
            Err(reason) => self.record_invalid(format!("keyword argument '{}': {}", name, reason)),
        }
        self
    }

    fn record_invalid(&mut self, reason: String) {
        if self.invalid.is_none() {
            self.invalid = Some(reason);
        }
    }

    /// Number of positional arguments
    pub fn positional_len(&self) -> usize {
        self.positional.len()
    }

    /// Number of keyword arguments
    pub fn keyword_len(&self) -> usize {
        self.keyword.len()
    }

    /// Deterministic byte encoding of the arguments
    fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let positional: Vec<Value> = self.positional.iter().cloned().map(canonicalize).collect();
        let keyword: Map<String, Value> = self
            .keyword
            .iter()
            .map(|(k, v)| (k.clone(), canonicalize(v.clone())))
            .collect();
        Ok(serde_json::to_vec(&(positional, keyword))?)
    }
}

/// Capture an argument as JSON; NaN and infinities would collapse to `null`
fn to_json<T: Serialize + ?Sized>(value: &T) -> std::result::Result<Value, String> {
    check_finite(value).map_err(|e| e.to_string())?;
    serde_json::to_value(value).map_err(|e| e.to_string())
}

/// Rebuild every JSON object with its keys in sorted order
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Derive the cache key for `operation` called with `args`
pub fn derive_key(operation: &str, args: &CallArgs) -> Result<CacheKey> {
    if let Some(reason) = &args.invalid {
        return Err(Error::KeyDerivation {
            operation: operation.to_string(),
            reason: reason.clone(),
        });
    }

    let serialized = args.canonical_bytes().map_err(|e| Error::KeyDerivation {
        operation: operation.to_string(),
        reason: e.to_string(),
    })?;

    let mut hasher = Sha256::new();
    hasher.update(operation.as_bytes());
    hasher.update(b":");
    hasher.update(&serialized);

    Ok(CacheKey(hex::encode(hasher.finalize())))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    #[test]
    fn test_key_shape() {
        let key = derive_key("square", &CallArgs::new().arg(&4)).unwrap();
        assert_eq!(key.as_str().len(), KEY_LEN);
        assert!(CacheKey::from_hex(key.as_str()).is_ok());
    }

    #[test]
    fn test_same_call_same_key() {
        let a = derive_key("square", &CallArgs::new().arg(&4)).unwrap();
        let b = derive_key("square", &CallArgs::new().arg(&4)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_known_digest() {
        // sha256("noop:[[],{}]")
        let key = derive_key("noop", &CallArgs::new()).unwrap();
        let mut hasher = Sha256::new();
        hasher.update(b"noop:[[],{}]");
        assert_eq!(key.as_str(), hex::encode(hasher.finalize()));
    }

    #[test]
    fn test_kwargs_order_independent() {
        let a = CallArgs::new().kwarg("b", &2).kwarg("a", &1);
        let b = CallArgs::new().kwarg("a", &1).kwarg("b", &2);
        assert_eq!(derive_key("f", &a).unwrap(), derive_key("f", &b).unwrap());
    }

    #[test]
    fn test_nested_map_order_independent() {
        let mut first = HashMap::new();
        let mut second = HashMap::new();
        for i in 0..32 {
            first.insert(format!("k{}", i), i);
        }
        for i in (0..32).rev() {
            second.insert(format!("k{}", i), i);
        }

        let a = CallArgs::new().arg(&first);
        let b = CallArgs::new().arg(&second);
        assert_eq!(derive_key("f", &a).unwrap(), derive_key("f", &b).unwrap());
    }

    #[test]
    fn test_different_values_different_keys() {
        let four = derive_key("square", &CallArgs::new().arg(&4)).unwrap();
        let five = derive_key("square", &CallArgs::new().arg(&5)).unwrap();
        let cube = derive_key("cube", &CallArgs::new().arg(&4)).unwrap();
        assert_ne!(four, five);
        assert_ne!(four, cube);
    }

    #[test]
    fn test_positional_vs_keyword_distinct() {
        let positional = derive_key("f", &CallArgs::new().arg(&1)).unwrap();
        let keyword = derive_key("f", &CallArgs::new().kwarg("x", &1)).unwrap();
        assert_ne!(positional, keyword);
    }

    #[test]
    fn test_kwarg_replaced() {
        let args = CallArgs::new().kwarg("x", &1).kwarg("x", &2);
        assert_eq!(args.keyword_len(), 1);
        let expected = CallArgs::new().kwarg("x", &2);
        assert_eq!(derive_key("f", &args).unwrap(), derive_key("f", &expected).unwrap());
    }

    #[test]
    fn test_unserializable_argument() {
        let mut bad = HashMap::new();
        bad.insert((1, 2), "tuple keys are not JSON object keys");

        let args = CallArgs::new().arg(&1).arg(&bad);
        assert_eq!(args.positional_len(), 1);

        let err = derive_key("f", &args).unwrap_err();
        assert_matches!(err, Error::KeyDerivation { ref operation, ref reason }
            if operation == "f" && reason.contains("positional argument 1"));
        assert!(!err.is_absorbed());
    }

    #[test]
    fn test_non_finite_floats_not_keyed_as_null() {
        let none = derive_key("f", &CallArgs::new().arg(&None::<f64>)).unwrap();
        assert_ne!(none, derive_key("f", &CallArgs::new().arg(&0.0f64)).unwrap());

        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = derive_key("f", &CallArgs::new().arg(&bad)).unwrap_err();
            assert_matches!(err, Error::KeyDerivation { ref reason, .. }
                if reason.contains("positional argument 0") && reason.contains("non-finite"));
        }

        let nested = CallArgs::new().kwarg("range", &vec![(0.0f32, f32::INFINITY)]);
        assert_matches!(
            derive_key("f", &nested),
            Err(Error::KeyDerivation { ref reason, .. }) if reason.contains("keyword argument 'range'")
        );
    }

    #[test]
    fn test_from_hex_rejects_paths() {
        assert_matches!(CacheKey::from_hex("../secrets"), Err(Error::InvalidKey(_)));
        assert_matches!(CacheKey::from_hex(&"A".repeat(64)), Err(Error::InvalidKey(_)));
        assert_matches!(CacheKey::from_hex(&"a".repeat(63)), Err(Error::InvalidKey(_)));
        assert!(CacheKey::from_hex(&"0a".repeat(32)).is_ok());
    }
}
