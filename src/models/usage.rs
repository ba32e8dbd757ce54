//! Accessors over the untyped usage object reported by the upstream.
//!
//! Responses-style APIs report `input_tokens` with a nested
//! `input_tokens_details.cached_tokens`; chat-completions-style bodies use
//! `prompt_tokens` and a flat `cached_tokens`. Both shapes are read here so
//! the analyzer does not care which API produced a capture.

use serde_json::Value;

/// Total input-side tokens for one capture. A present-but-non-numeric field
/// counts as 0 rather than falling through to the legacy name.
pub fn input_tokens(usage: &Value) -> u64 {
    usage
        .get("input_tokens")
        .or_else(|| usage.get("prompt_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

/// Tokens served from the upstream prompt cache.
pub fn cached_tokens(usage: &Value) -> u64 {
    usage
        .get("input_tokens_details")
        .and_then(|details| details.get("cached_tokens"))
        .or_else(|| usage.get("cached_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}
