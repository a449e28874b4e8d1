//! Canonical content hashing
//!
//! Serialize to JSON, drop known non-deterministic fields at every depth, sort
//! object keys recursively, then SHA-256 the compact encoding.

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Fields that never participate in a content hash.
pub const NON_DETERMINISTIC_FIELDS: &[&str] = &["compiled_at", "hash", "estimated_seconds"];

/// Lowercase hex SHA-256 over the canonical form of `value`.
pub fn content_hash<T: Serialize>(value: &T) -> Result<String> {
    let canonical = canonicalize(serde_json::to_value(value)?, NON_DETERMINISTIC_FIELDS);
    let bytes = serde_json::to_vec(&canonical)?;
    Ok(sha256_hex(&bytes))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Deep-sort keys and strip `excluded` fields from every object.
pub fn canonicalize(value: Value, excluded: &[&str]) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map
                .into_iter()
                .filter(|(k, _)| !excluded.contains(&k.as_str()))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(k, canonicalize(v, excluded));
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|v| canonicalize(v, excluded)).collect())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_does_not_matter() {
        let a = json!({"b": 1, "a": {"y": [1, 2], "x": "s"}});
        let b = json!({"a": {"x": "s", "y": [1, 2]}, "b": 1});
        assert_eq!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
    }

    #[test]
    fn test_excluded_fields_stripped_at_depth() {
        let a = json!({"plan": {"compiled_at": 1, "v": 2}, "hash": "x"});
        let b = json!({"plan": {"compiled_at": 999, "v": 2}, "hash": "y"});
        assert_eq!(content_hash(&a).unwrap(), content_hash(&b).unwrap());

        let c = json!({"plan": {"compiled_at": 1, "v": 3}});
        assert_ne!(content_hash(&a).unwrap(), content_hash(&c).unwrap());
    }

    #[test]
    fn test_array_order_matters() {
        assert_ne!(
            content_hash(&json!([1, 2])).unwrap(),
            content_hash(&json!([2, 1])).unwrap()
        );
    }

    #[test]
    fn test_hex_format() {
        let h = content_hash(&json!({})).unwrap();
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
