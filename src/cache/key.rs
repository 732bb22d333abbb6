//! Cache key derivation: `namespace:hex(sha256(canonical_json(args)))`.
//!
//! Canonical ordering relies on `serde_json::Value`'s default `BTreeMap`
//! backing (the `preserve_order` feature is off), so `to_string` always
//! emits object keys in sorted order regardless of call-site argument order.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// A derived cache key: namespace plus the hex digest of its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Logical namespace the key was derived under (e.g. `googleSearch`).
    pub namespace: String,
    /// Lowercase hex SHA-256 digest of the canonical argument JSON.
    pub hex: String,
}

impl CacheKey {
    /// Derive a key from a namespace and an arguments value.
    #[must_use]
    pub fn new(namespace: &str, arguments: &Value) -> Self {
        let canonical = canonical_json(arguments);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let digest = hasher.finalize();
        Self {
            namespace: namespace.to_string(),
            hex: format!("{digest:x}"),
        }
    }

    /// The `namespace:hex` string used as the in-memory map key.
    #[must_use]
    pub fn full(&self) -> String {
        format!("{}:{}", self.namespace, self.hex)
    }
}

/// Serialize a JSON value with sorted object keys.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn same_arguments_different_key_order_produce_same_hash() {
        let a = CacheKey::new("googleSearch", &json!({"q": "rust", "num": 10}));
        let b = CacheKey::new("googleSearch", &json!({"num": 10, "q": "rust"}));
        assert_eq!(a.hex, b.hex);
    }

    #[test]
    fn different_namespace_same_arguments_differ() {
        let a = CacheKey::new("googleSearch", &json!({"q": "rust"}));
        let b = CacheKey::new("scrapePage", &json!({"q": "rust"}));
        assert_eq!(a.hex, b.hex);
        assert_ne!(a.full(), b.full());
    }

    #[test]
    fn different_arguments_differ() {
        let a = CacheKey::new("googleSearch", &json!({"q": "rust"}));
        let b = CacheKey::new("googleSearch", &json!({"q": "rust2"}));
        assert_ne!(a.hex, b.hex);
    }

    #[test]
    fn full_key_shape() {
        let k = CacheKey::new("googleSearch", &json!({"q": "rust"}));
        assert_eq!(k.full(), format!("googleSearch:{}", k.hex));
        assert_eq!(k.hex.len(), 64);
    }
}
