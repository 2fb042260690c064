//! Canonical JSON: a byte-stable re-serialization used anywhere the spec
//! calls for `SHA-256(canonical(x))` — proof hashes over webhook payloads,
//! schedule-commitment hashes. `serde_json::Map` is a `BTreeMap` by default
//! (the `preserve_order` feature is never enabled in this workspace), so
//! parsing and re-serializing already yields fixed, sorted key order at
//! every nesting level.
use serde::Serialize;
use serde_json::Value;

/// Canonicalizes already-serialized JSON bytes (e.g. a webhook raw body).
pub fn canonicalize_json_bytes(raw: &[u8]) -> serde_json::Result<Vec<u8>> {
    let value: Value = serde_json::from_slice(raw)?;
    serde_json::to_vec(&value)
}

/// Canonicalizes any `Serialize` value directly, skipping the parse step.
pub fn canonicalize<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    serde_json::to_vec(&value)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_is_normalised() {
        let a = canonicalize_json_bytes(br#"{"b":1,"a":2}"#).unwrap();
        let b = canonicalize_json_bytes(br#"{"a":2,"b":1}"#).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn nested_objects_are_normalised_too() {
        let a = canonicalize_json_bytes(br#"{"outer":{"z":1,"y":2},"a":0}"#).unwrap();
        let b = canonicalize_json_bytes(br#"{"a":0,"outer":{"y":2,"z":1}}"#).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn serialize_helper_matches_bytes_helper() {
        let v = json!({"b": 1, "a": 2});
        let via_value = canonicalize(&v).unwrap();
        let via_bytes = canonicalize_json_bytes(br#"{"a":2,"b":1}"#).unwrap();
        assert_eq!(via_value, via_bytes);
    }
}
