use serde_json::Value;
use sha2::{Digest, Sha256};

/// Recursively key-sort every object in `value`, leaving arrays in place.
/// This is the canonical form used for every signable payload, event id,
/// receipt id, idempotency payload hash, and state-store snapshot.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for k in keys {
                sorted.insert(k.clone(), canonicalize(&map[k]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Serialize `value` to its canonical JSON byte string: keys sorted
/// recursively, no extraneous whitespace, array order preserved.
pub fn to_canonical_bytes(value: &Value) -> Vec<u8> {
    serde_json::to_vec(&canonicalize(value)).expect("canonical JSON is always serializable")
}

pub fn to_canonical_string(value: &Value) -> String {
    String::from_utf8(to_canonical_bytes(value)).expect("canonical JSON is valid utf8")
}

/// SHA-256 of the canonical serialization, as a lowercase hex string.
pub fn sha256_hex(value: &Value) -> String {
    let bytes = to_canonical_bytes(value);
    let digest = Sha256::digest(&bytes);
    hex_encode(&digest)
}

/// SHA-256 over an already-canonical byte string made of `|`-joined parts,
/// used for id derivations that hash a literal key string rather than a
/// JSON value (event ids, proposal ids).
pub fn sha256_hex_of(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex_encode(&digest)
}

/// First `n` hex characters of a SHA-256 digest.
pub fn sha256_prefix(input: &str, n: usize) -> String {
    let full = sha256_hex_of(input);
    full[..n.min(full.len())].to_string()
}

pub fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// Strip a top-level field (e.g. `signature`) before signing/verifying a
/// payload whose envelope carries its own signature.
pub fn without_field(value: &Value, field: &str) -> Value {
    match value {
        Value::Object(map) => {
            let mut map = map.clone();
            map.remove(field);
            Value::Object(map)
        }
        other => other.clone(),
    }
}
