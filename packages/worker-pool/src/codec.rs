//! ============================================================================
//! File: packages/worker-pool/src/codec.rs
//! ----------------------------------------------------------------------------
//! Prototype-pollution-safe JSON encode/decode. Rust values have no prototype
//! chain, but a worker-supplied `__proto__`/`constructor`/`prototype` key can
//! still shadow a well-known field once merged into host-side maps, so the
//! same three keys are stripped defensively on every decode. This module is
//! the only allowed path from worker bytes to a host-side [`serde_json::Value`].
//! ============================================================================

use serde_json::{Map, Value};

use crate::error::{Result, WorkerPoolError};

/// Keys that must never survive a decode — property names that, in a
/// structured-clone channel, would pollute a shared prototype.
const DANGEROUS_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

/// Maximum nesting depth of a decoded value, matching the global invariant
/// that no decoded object nests deeper than 50.
const MAX_DEPTH: usize = 50;

/// Decodes a line of worker-supplied bytes into a sanitized [`Value`].
///
/// 1. Rejects payloads larger than `max_size` with [`WorkerPoolError::MessageSize`].
/// 2. Parses JSON, mapping parse failures to [`WorkerPoolError::MessageValidation`].
/// 3. Walks the tree stripping [`DANGEROUS_KEYS`] from every object and
///    rejecting depth > [`MAX_DEPTH`].
pub fn decode(bytes: &[u8], max_size: usize) -> Result<Value> {
    if bytes.len() > max_size {
        return Err(WorkerPoolError::MessageSize {
            size: bytes.len(),
            limit: max_size,
        });
    }
    let raw: Value =
        serde_json::from_slice(bytes).map_err(|e| WorkerPoolError::MessageValidation {
            detail: format!("invalid JSON: {e}"),
        })?;
    sanitize(raw, 0)
}

/// Encodes a value to a JSON line, stripping [`DANGEROUS_KEYS`] first so the
/// host never emits them either.
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    let clean = sanitize(value.clone(), 0)?;
    serde_json::to_vec(&clean).map_err(|e| WorkerPoolError::MessageValidation {
        detail: format!("failed to encode: {e}"),
    })
}

fn sanitize(value: Value, depth: usize) -> Result<Value> {
    if depth > MAX_DEPTH {
        return Err(WorkerPoolError::MessageValidation {
            detail: "depth exceeded".into(),
        });
    }
    match value {
        Value::Object(map) => {
            let mut clean = Map::with_capacity(map.len());
            for (key, v) in map {
                if DANGEROUS_KEYS.contains(&key.as_str()) {
                    continue;
                }
                clean.insert(key, sanitize(v, depth + 1)?);
            }
            Ok(Value::Object(clean))
        }
        Value::Array(items) => {
            let mut clean = Vec::with_capacity(items.len());
            for item in items {
                clean.push(sanitize(item, depth + 1)?);
            }
            Ok(Value::Array(clean))
        }
        scalar => Ok(scalar),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn strips_dangerous_keys_at_any_depth() {
        let payload = json!({
            "__proto__": {"polluted": true},
            "ok": {"constructor": "evil", "nested": {"prototype": 1, "fine": 2}},
        });
        let decoded = decode(payload.to_string().as_bytes(), 1024).unwrap();
        assert_eq!(decoded["ok"]["nested"].as_object().unwrap().len(), 1);
        assert!(decoded.get("__proto__").is_none());
        assert!(decoded["ok"].get("constructor").is_none());
        assert_eq!(decoded["ok"]["nested"]["fine"], 2);
    }

    #[test]
    fn rejects_oversized_payload() {
        let payload = json!({"x": "y"}).to_string();
        let err = decode(payload.as_bytes(), 2).unwrap_err();
        assert!(matches!(err, WorkerPoolError::MessageSize { .. }));
    }

    #[test]
    fn rejects_invalid_json() {
        let err = decode(b"not json", 1024).unwrap_err();
        assert!(matches!(err, WorkerPoolError::MessageValidation { .. }));
    }

    #[test]
    fn rejects_excessive_depth() {
        let mut value = json!(1);
        for _ in 0..(MAX_DEPTH + 5) {
            value = json!({ "n": value });
        }
        let err = decode(value.to_string().as_bytes(), 10 * 1024 * 1024).unwrap_err();
        assert!(matches!(err, WorkerPoolError::MessageValidation { .. }));
    }

    #[test]
    fn round_trips_structure_modulo_dangerous_keys() {
        let payload = json!({"a": 1, "b": [1, 2, {"c": "d"}]});
        let encoded = encode(&payload).unwrap();
        let decoded = decode(&encoded, 10 * 1024 * 1024).unwrap();
        assert_eq!(decoded, payload);
    }
}
