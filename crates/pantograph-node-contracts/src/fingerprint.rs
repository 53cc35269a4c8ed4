//! Content-stable fingerprinting for cache keys.
//!
//! The output cache and the KV repository's `getObjectAsIdString` both need
//! a hash that is stable under insertion order of object keys, equivalent
//! numeric representations, and process restarts. `serde_json::Value`
//! already normalizes numeric representation on parse; canonicalizing object
//! key order before hashing gives the rest.

use std::collections::BTreeMap;

use serde_json::Value as Json;

/// Computes a stable content fingerprint of any JSON-serializable value.
///
/// Returns the lowercase hex encoding of a blake3 hash over a canonical
/// encoding (object keys sorted, recursively) of `value`.
pub fn fingerprint_json(value: &Json) -> String {
    let canonical = canonicalize(value);
    blake3::hash(canonical.as_bytes()).to_hex().to_string()
}

/// Convenience wrapper for any `Serialize` value.
pub fn fingerprint<T: serde::Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_value(value)?;
    Ok(fingerprint_json(&json))
}

fn canonicalize(value: &Json) -> String {
    match value {
        Json::Object(map) => {
            let sorted: BTreeMap<&String, &Json> = map.iter().collect();
            let parts: Vec<String> = sorted
                .into_iter()
                .map(|(k, v)| format!("{}:{}", canonicalize_string(k), canonicalize(v)))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        Json::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", parts.join(","))
        }
        Json::String(s) => canonicalize_string(s),
        Json::Number(_) | Json::Bool(_) | Json::Null => value.to_string(),
    }
}

fn canonicalize_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("{s:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stable_under_key_order() {
        let a = json!({"a": 1, "b": 2});
        let b = json!({"b": 2, "a": 1});
        assert_eq!(fingerprint_json(&a), fingerprint_json(&b));
    }

    #[test]
    fn stable_across_reparse_of_the_same_text() {
        // Two independently-parsed copies of identical JSON text must
        // fingerprint identically, regardless of the source's key order.
        let text = r#"{"n": 2, "s": "hi", "nested": {"z": 1, "a": 2}}"#;
        let a: Json = serde_json::from_str(text).unwrap();
        let b: Json = serde_json::from_str(text).unwrap();
        assert_eq!(fingerprint_json(&a), fingerprint_json(&b));
    }

    #[test]
    fn differs_on_different_content() {
        assert_ne!(fingerprint_json(&json!({"a": 1})), fingerprint_json(&json!({"a": 2})));
    }
}
