//! Persisted capture metadata: the two `*.meta.json` artifacts plus the
//! best-effort cache identity extracted from each request.

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request-side metadata, written to `capture.meta.json` when the capture
/// directory is allocated.
#[derive(Debug, Serialize, Deserialize)]
pub struct CaptureMeta {
    pub method: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_ident: Option<CacheIdentity>,
    pub captured_at: DateTime<Utc>,
}

/// Response-side metadata, written to `response.meta.json` once the upstream
/// exchange finishes. `streaming` and `capture_truncated` only appear on the
/// streaming path; `usage` only when the upstream reported one.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub upstream_url: String,
    pub status_code: u16,
    pub elapsed_ms: u64,
    pub captured_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streaming: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_truncated: Option<bool>,
}

/// Best-effort key for grouping captures at analysis time. The proxy never
/// routes or caches on it. Empty-string sources count as absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheIdentity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(rename = "x-session-id", skip_serializing_if = "Option::is_none")]
    pub x_session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_cache_key: Option<String>,
}

impl CacheIdentity {
    /// Pull identity signals from the request headers and parsed body.
    /// Returns `None` when no signal is present.
    pub fn extract(headers: &HeaderMap, body: Option<&Value>) -> Option<Self> {
        let header_value = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };
        let body_value = |key: &str| {
            body.and_then(|b| b.get(key))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };

        let ident = CacheIdentity {
            session_id: header_value("session_id"),
            x_session_id: header_value("x-session-id"),
            prompt_cache_key: body_value("prompt_cache_key")
                .or_else(|| body_value("promptCacheKey")),
        };

        if ident.session_id.is_none()
            && ident.x_session_id.is_none()
            && ident.prompt_cache_key.is_none()
        {
            None
        } else {
            Some(ident)
        }
    }

    /// The single grouping key the analyzer uses. The deliberate body-level
    /// signal outranks transport-level session headers.
    pub fn primary(&self) -> Option<&str> {
        self.prompt_cache_key
            .as_deref()
            .or(self.session_id.as_deref())
            .or(self.x_session_id.as_deref())
    }
}
