//! Canonical JSON rewriting for diff-stable request bodies.
//!
//! Captured request bodies are compared across runs to work out why a prompt
//! prefix did or did not hit the upstream cache. Raw bodies differ in noise:
//! per-request ids, tracing headers echoed into the payload, the `stream`
//! flag. `normalize` strips that noise so two captures of the "same" prompt
//! serialize identically.

use serde_json::{Map, Value};

/// Keys that legitimately vary between otherwise-identical requests.
/// Dropped at every nesting depth.
const VOLATILE_KEYS: &[&str] = &[
    "stream",
    "metadata",
    "user",
    "request_id",
    "traceparent",
    "tracestate",
];

/// Produce the canonical form of a JSON value: volatile keys removed at all
/// depths, object keys sorted on serialization, array order preserved.
/// Idempotent — normalizing an already-normalized value is a no-op.
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(obj) => {
            // serde_json's Map is BTreeMap-backed, so keys come out sorted.
            let mut out = Map::new();
            for (key, val) in obj {
                if VOLATILE_KEYS.contains(&key.as_str()) {
                    continue;
                }
                out.insert(key.clone(), normalize(val));
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(normalize).collect()),
        other => other.clone(),
    }
}
