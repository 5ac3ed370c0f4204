// # -----------------------------
// # crates/common/src/canonical.rs
// # -----------------------------
//! Canonical JSON: sorted keys, UTF-8, LF line endings, two-space indent, no
//! trailing newline. Required for stable hashing across §4.G / §4.H.
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

pub fn sha256_hex(data: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(data);
    hex::encode(h.finalize())
}

fn sort_value(v: Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut sorted: std::collections::BTreeMap<String, Value> =
                std::collections::BTreeMap::new();
            for (k, val) in map {
                sorted.insert(k, sort_value(val));
            }
            let mut out = serde_json::Map::new();
            for (k, val) in sorted {
                out.insert(k, val);
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(sort_value).collect()),
        other => other,
    }
}

/// Serialize `value` to canonical JSON text (sorted keys, 2-space indent, LF,
/// no trailing newline).
pub fn canonical_json<T: Serialize>(value: &T) -> serde_json::Result<String> {
    let raw = serde_json::to_value(value)?;
    let sorted = sort_value(raw);
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"  ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    sorted.serialize(&mut ser)?;
    let mut s = String::from_utf8(buf).expect("json output is valid utf-8");
    // serde_json never emits CRLF, but normalize defensively; ensure no
    // trailing newline.
    s = s.replace("\r\n", "\n");
    while s.ends_with('\n') {
        s.pop();
    }
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_keys_and_has_no_trailing_newline() {
        let v = json!({"b": 1, "a": {"z": 1, "y": 2}});
        let s = canonical_json(&v).unwrap();
        assert!(!s.ends_with('\n'));
        let a_idx = s.find("\"a\"").unwrap();
        let b_idx = s.find("\"b\"").unwrap();
        assert!(a_idx < b_idx);
        let y_idx = s.find("\"y\"").unwrap();
        let z_idx = s.find("\"z\"").unwrap();
        assert!(y_idx < z_idx);
    }

    #[test]
    fn idempotent_round_trip() {
        let v = json!({"k": [3, 1, 2], "m": {"x": true}});
        let once = canonical_json(&v).unwrap();
        let reparsed: Value = serde_json::from_str(&once).unwrap();
        let twice = canonical_json(&reparsed).unwrap();
        assert_eq!(once, twice);
    }
}
