use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Upstream origin, scheme + authority only. Trailing slash is trimmed.
    /// Set via CACHETAP_UPSTREAM_BASE_URL. Default: https://api.openai.com.
    pub upstream_base_url: String,
    /// Upstream path the Responses aliases rewrite to.
    /// Set via CACHETAP_UPSTREAM_RESPONSES_PATH. Default: /v1/responses.
    pub upstream_responses_path: String,
    /// Replaces the client's Authorization header upstream when set.
    pub upstream_api_key: Option<String>,
    /// Capture store root. Set via CACHETAP_LOG_DIR. Default: ./logs.
    pub log_dir: PathBuf,
    /// Persist Authorization/Cookie values verbatim instead of masking them.
    pub log_sensitive_headers: bool,
    /// Write response.body.json for non-streaming responses.
    pub capture_response_body: bool,
    /// Write response.sse.txt for streaming responses.
    pub capture_sse_text: bool,
    /// Cap on captured response bytes per request. Default: 5_000_000.
    pub max_capture_bytes: usize,
    pub host: String,
    pub port: u16,
}

pub fn load() -> anyhow::Result<ProxyConfig> {
    dotenvy::dotenv().ok();

    let upstream_base_url = normalize_base_url(
        &std::env::var("CACHETAP_UPSTREAM_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com".into()),
    )?;

    let upstream_responses_path = normalize_path(
        &std::env::var("CACHETAP_UPSTREAM_RESPONSES_PATH").unwrap_or_else(|_| "/v1/responses".into()),
    );

    Ok(ProxyConfig {
        upstream_base_url,
        upstream_responses_path,
        upstream_api_key: std::env::var("CACHETAP_UPSTREAM_API_KEY")
            .ok()
            .filter(|s| !s.trim().is_empty()),
        log_dir: PathBuf::from(std::env::var("CACHETAP_LOG_DIR").unwrap_or_else(|_| "./logs".into())),
        log_sensitive_headers: env_bool("CACHETAP_LOG_SENSITIVE_HEADERS", false),
        capture_response_body: env_bool("CACHETAP_CAPTURE_RESPONSE_BODY", true),
        capture_sse_text: env_bool("CACHETAP_CAPTURE_SSE_TEXT", true),
        max_capture_bytes: std::env::var("CACHETAP_MAX_CAPTURE_BYTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5_000_000),
        host: std::env::var("CACHETAP_HOST").unwrap_or_else(|_| "127.0.0.1".into()),
        port: std::env::var("CACHETAP_PORT")
            .unwrap_or_else(|_| "8080".into())
            .parse()
            .unwrap_or(8080),
    })
}

/// Validate and canonicalize the upstream origin. Fails fast at startup on
/// anything that is not an absolute http(s) URL.
fn normalize_base_url(raw: &str) -> anyhow::Result<String> {
    let parsed = url::Url::parse(raw.trim())
        .map_err(|e| anyhow::anyhow!("invalid CACHETAP_UPSTREAM_BASE_URL '{raw}': {e}"))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        anyhow::bail!(
            "invalid CACHETAP_UPSTREAM_BASE_URL '{raw}': scheme must be http or https"
        );
    }
    Ok(raw.trim().trim_end_matches('/').to_string())
}

fn normalize_path(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn env_bool(var: &str, default: bool) -> bool {
    match std::env::var(var) {
        Ok(raw) => truthy(&raw),
        Err(_) => default,
    }
}

/// Accepted truthy spellings; anything else is false.
fn truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}
