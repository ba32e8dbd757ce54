//! Usage extraction from captured event-stream text.
//!
//! Streaming upstreams report token usage inside one of the SSE events,
//! usually the completion event at the very end. After a stream closes, the
//! captured text prefix is scanned for the most recent `data:` payload that
//! parses to an object carrying an object-valued `usage` field.

use serde_json::Value;

/// Scan captured SSE text for the last usage object emitted.
/// Returns the `usage` value itself, not the surrounding event.
pub fn extract_usage(text: &str) -> Option<Value> {
    // Later events supersede earlier ones, so walk backward and take the
    // first hit.
    for line in text.lines().rev() {
        let Some(data) = data_payload(line) else {
            continue;
        };
        if data.is_empty() || data == "[DONE]" {
            continue;
        }
        let Ok(event) = serde_json::from_str::<Value>(data) else {
            continue;
        };
        if let Some(usage) = event.get("usage") {
            if usage.is_object() {
                return Some(usage.clone());
            }
        }
    }
    None
}

/// Strip the SSE `data:` prefix (with or without the space) from a line.
fn data_payload(line: &str) -> Option<&str> {
    let line = line.trim();
    if let Some(stripped) = line.strip_prefix("data: ") {
        Some(stripped.trim())
    } else if let Some(stripped) = line.strip_prefix("data:") {
        Some(stripped.trim())
    } else {
        None
    }
}
