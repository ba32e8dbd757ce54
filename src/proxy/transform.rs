//! Request/response shaping between the client-facing listener and the
//! upstream API: path aliasing, header filtering, redaction for persisted
//! artifacts, and body parsing helpers.

use axum::http::{header, HeaderMap, HeaderValue};
use serde_json::{json, Map, Value};

use crate::normalize;

/// Client paths that all mean "the Responses endpoint". Matched after
/// trimming a trailing slash.
const RESPONSES_ALIASES: &[&str] = &[
    "/openai/v1/response",
    "/openai/v1/responses",
    "/v1/responses",
];

/// Never forwarded upstream. `host` and `content-length` are rewritten by
/// reqwest for the new connection; `accept-encoding` is dropped so the
/// upstream sends plaintext we can capture.
const STRIP_REQUEST_HEADERS: &[&str] = &["host", "content-length", "connection", "accept-encoding"];

/// Never echoed back to the client: framing is re-established by axum for
/// the client connection, and the body we relay is already decoded.
const STRIP_RESPONSE_HEADERS: &[&str] = &[
    "content-encoding",
    "transfer-encoding",
    "content-length",
    "connection",
];

/// Replaced with `[REDACTED]` in persisted header artifacts unless the
/// operator opts in to logging them.
const REDACTED_HEADERS: &[&str] = &["authorization", "cookie", "set-cookie"];

/// Map an incoming path onto the upstream path. Known Responses aliases are
/// rewritten to the configured endpoint; anything else passes through
/// unchanged so unrecognized API surfaces still reach the upstream.
pub fn resolve_path(path: &str, upstream_responses_path: &str) -> String {
    let trimmed = if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    };
    if RESPONSES_ALIASES.contains(&trimmed) {
        upstream_responses_path.to_string()
    } else {
        path.to_string()
    }
}

/// Join base URL, resolved path, and original query string. The base has its
/// trailing slash trimmed at config load.
pub fn build_upstream_url(base_url: &str, path: &str, query: Option<&str>) -> String {
    match query {
        Some(q) if !q.is_empty() => format!("{}{}?{}", base_url, path, q),
        _ => format!("{}{}", base_url, path),
    }
}

/// Copy client headers for the upstream request, minus the per-connection
/// set. When an upstream API key is configured it replaces whatever
/// `Authorization` the client sent.
pub fn build_upstream_headers(incoming: &HeaderMap, api_key: Option<&str>) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in incoming {
        if STRIP_REQUEST_HEADERS.contains(&name.as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    if let Some(key) = api_key {
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {key}")) {
            out.insert(header::AUTHORIZATION, value);
        }
    }
    out
}

/// Copy upstream response headers for the client, minus framing headers that
/// no longer describe the relayed body.
pub fn client_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in upstream {
        if STRIP_RESPONSE_HEADERS.contains(&name.as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Render headers as a JSON object for persistence. Secret-bearing headers
/// are masked unless `log_sensitive` is set. Repeated headers collapse to
/// the last value.
pub fn headers_to_json(headers: &HeaderMap, log_sensitive: bool) -> Value {
    let mut map = Map::new();
    for (name, value) in headers {
        let text = if !log_sensitive && REDACTED_HEADERS.contains(&name.as_str()) {
            "[REDACTED]".to_string()
        } else {
            String::from_utf8_lossy(value.as_bytes()).into_owned()
        };
        map.insert(name.as_str().to_string(), Value::String(text));
    }
    Value::Object(map)
}

/// Opportunistic JSON parse of the raw request body. `None` for empty or
/// non-JSON bodies; forwarding never depends on this succeeding.
pub fn parse_body(raw: &[u8]) -> Option<Value> {
    if raw.is_empty() {
        return None;
    }
    serde_json::from_slice(raw).ok()
}

/// The normalized-body artifact: volatile keys stripped when the body parsed,
/// or a lossy text wrapper when it did not.
pub fn normalized_body(raw: &[u8], parsed: Option<&Value>) -> Value {
    match parsed {
        Some(value) => normalize::normalize(value),
        None => json!({ "_raw": String::from_utf8_lossy(raw) }),
    }
}

/// Whether the client asked for SSE: a literal `"stream": true` in the body,
/// or an Accept header requesting `text/event-stream`. Absent, null, or
/// non-boolean `stream` values mean non-streaming.
pub fn wants_stream(headers: &HeaderMap, body: Option<&Value>) -> bool {
    if body
        .and_then(|b| b.get("stream"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return true;
    }
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("text/event-stream"))
        .unwrap_or(false)
}
