//! End-to-end tests for the proxy pipeline.
//!
//! These tests verify:
//! 1. Transparent forwarding: status, headers, and bodies pass through
//!    byte-identical on both the buffered and the streaming path
//! 2. Capture persistence: every proxied request leaves a complete,
//!    well-formed capture directory behind
//! 3. Path aliasing, auth override, and redaction behavior
//! 4. The analyzer consumes what the proxy writes
//!
//! Each test runs the real router on an ephemeral listener against a
//! `wiremock` upstream and a `tempfile` store root. Streaming persistence is
//! asynchronous, so those tests poll for artifacts with a bounded deadline.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tempfile::TempDir;

use cachetap::config::ProxyConfig;
use cachetap::proxy::upstream::UpstreamClient;
use cachetap::store::CaptureStore;
use cachetap::AppState;

/// Start the proxy on an ephemeral port. Returns its base URL and the
/// capture-store tempdir (dropped = cleaned up).
async fn start_proxy(upstream_url: &str, tweak: impl FnOnce(&mut ProxyConfig)) -> (String, TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = ProxyConfig {
        upstream_base_url: upstream_url.trim_end_matches('/').to_string(),
        upstream_responses_path: "/v1/responses".to_string(),
        upstream_api_key: None,
        log_dir: tmp.path().to_path_buf(),
        log_sensitive_headers: false,
        capture_response_body: true,
        capture_sse_text: true,
        max_capture_bytes: 5_000_000,
        host: "127.0.0.1".to_string(),
        port: 0,
    };
    tweak(&mut config);

    let state = Arc::new(AppState {
        store: CaptureStore::new(config.log_dir.clone()),
        upstream: UpstreamClient::new().unwrap(),
        config,
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, cachetap::app(state)).await.unwrap();
    });
    (base, tmp)
}

/// All capture directories under the store root, sorted.
fn capture_dirs(root: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(days) = std::fs::read_dir(root) {
        for day in days.flatten() {
            if !day.path().is_dir() {
                continue;
            }
            if let Ok(requests) = std::fs::read_dir(day.path()) {
                for request in requests.flatten() {
                    if request.path().is_dir() {
                        dirs.push(request.path());
                    }
                }
            }
        }
    }
    dirs.sort();
    dirs
}

fn the_capture_dir(root: &Path) -> PathBuf {
    let dirs = capture_dirs(root);
    assert_eq!(dirs.len(), 1, "expected exactly one capture under {root:?}");
    dirs.into_iter().next().unwrap()
}

fn read_json(path: &Path) -> Value {
    let bytes = std::fs::read(path).unwrap_or_else(|e| panic!("read {path:?}: {e}"));
    serde_json::from_slice(&bytes).unwrap_or_else(|e| panic!("parse {path:?}: {e}"))
}

/// Streaming captures land after the client has drained the body; poll
/// rather than sleep.
async fn wait_for_artifact(dir: &Path, name: &str) -> PathBuf {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return candidate;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {name} under {dir:?}"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

mod forwarding_tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // ── Basic passthrough ─────────────────────────────────────

    #[tokio::test]
    async fn test_health_is_answered_locally() {
        let upstream = MockServer::start().await;
        let (base, _tmp) = start_proxy(&upstream.uri(), |_| {}).await;

        let resp = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["ok"], "true");

        assert!(
            upstream.received_requests().await.unwrap().is_empty(),
            "health must never reach the upstream"
        );
    }

    #[tokio::test]
    async fn test_forwards_response_bytes_and_persists_full_capture() {
        let upstream = MockServer::start().await;
        let upstream_body =
            br#"{"id":"resp_1","usage":{"input_tokens":100,"input_tokens_details":{"cached_tokens":25}}}"#;
        Mock::given(method("POST"))
            .and(path("/v1/responses"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-request-id", "req_up_1")
                    .set_body_raw(upstream_body.to_vec(), "application/json"),
            )
            .expect(1)
            .mount(&upstream)
            .await;

        let (base, tmp) = start_proxy(&upstream.uri(), |_| {}).await;

        let request_body = r#"{"model": "gpt-4o", "input": "hi", "stream": false}"#;
        let resp = reqwest::Client::new()
            .post(format!("{base}/v1/responses"))
            .header("content-type", "application/json")
            .body(request_body)
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["x-request-id"], "req_up_1");
        let returned = resp.bytes().await.unwrap();
        assert_eq!(&returned[..], &upstream_body[..], "response must pass through untouched");

        let dir = the_capture_dir(tmp.path());

        // Raw body is byte-identical to what the client sent.
        let raw = std::fs::read(dir.join("request.body.json")).unwrap();
        assert_eq!(raw, request_body.as_bytes());

        // Normalized body drops the volatile `stream` key and sorts.
        let normalized = read_json(&dir.join("request.body.normalized.json"));
        assert_eq!(
            serde_json::to_string(&normalized).unwrap(),
            r#"{"input":"hi","model":"gpt-4o"}"#
        );

        let capture_meta = read_json(&dir.join("capture.meta.json"));
        assert_eq!(capture_meta["method"], "POST");
        assert_eq!(capture_meta["path"], "/v1/responses");

        let response_meta = read_json(&dir.join("response.meta.json"));
        assert_eq!(response_meta["status_code"], 200);
        assert_eq!(response_meta["usage"]["input_tokens"], 100);
        assert!(
            response_meta.get("streaming").is_none(),
            "non-streaming meta must not carry a streaming key"
        );

        let response_body = read_json(&dir.join("response.body.json"));
        assert_eq!(response_body["id"], "resp_1");
    }

    #[tokio::test]
    async fn test_alias_paths_rewrite_and_preserve_query() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/responses"))
            .and(query_param("debug", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
            .expect(2)
            .mount(&upstream)
            .await;

        let (base, _tmp) = start_proxy(&upstream.uri(), |_| {}).await;
        let client = reqwest::Client::new();

        for alias in ["/openai/v1/response", "/openai/v1/responses"] {
            let resp = client
                .post(format!("{base}{alias}?debug=1"))
                .body("{}")
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 200, "alias {alias} should reach the upstream");
        }
    }

    #[tokio::test]
    async fn test_unknown_paths_pass_through_unchanged() {
        let upstream = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(r#"{"data":[]}"#, "application/json"),
            )
            .expect(1)
            .mount(&upstream)
            .await;

        let (base, tmp) = start_proxy(&upstream.uri(), |_| {}).await;
        let resp = reqwest::get(format!("{base}/v1/models")).await.unwrap();
        assert_eq!(resp.status(), 200);

        // Still captured, with no usage recorded.
        let dir = the_capture_dir(tmp.path());
        let response_meta = read_json(&dir.join("response.meta.json"));
        assert_eq!(response_meta["status_code"], 200);
        assert!(response_meta.get("usage").is_none());
    }

    #[tokio::test]
    async fn test_non_json_body_is_forwarded_and_wrapped() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/responses"))
            .and(body_string("this is not json"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
            .expect(1)
            .mount(&upstream)
            .await;

        let (base, tmp) = start_proxy(&upstream.uri(), |_| {}).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/v1/responses"))
            .body("this is not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let dir = the_capture_dir(tmp.path());
        let raw = std::fs::read(dir.join("request.body.json")).unwrap();
        assert_eq!(raw, b"this is not json");

        let normalized = read_json(&dir.join("request.body.normalized.json"));
        assert_eq!(normalized["_raw"], "this is not json");
    }

    // ── Credentials ───────────────────────────────────────────

    #[tokio::test]
    async fn test_configured_api_key_replaces_client_auth() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/responses"))
            .and(header("authorization", "Bearer proxy-key"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
            .expect(1)
            .mount(&upstream)
            .await;

        let (base, tmp) = start_proxy(&upstream.uri(), |cfg| {
            cfg.upstream_api_key = Some("proxy-key".to_string());
        })
        .await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/v1/responses"))
            .header("authorization", "Bearer client-key")
            .body("{}")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        // The persisted headers never contain either secret.
        let dir = the_capture_dir(tmp.path());
        let headers = read_json(&dir.join("request.headers.json"));
        assert_eq!(headers["authorization"], "[REDACTED]");
    }

    #[tokio::test]
    async fn test_client_auth_passes_through_when_no_key_configured() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/responses"))
            .and(header("authorization", "Bearer client-key"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
            .expect(1)
            .mount(&upstream)
            .await;

        let (base, _tmp) = start_proxy(&upstream.uri(), |_| {}).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/v1/responses"))
            .header("authorization", "Bearer client-key")
            .body("{}")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn test_cache_identity_lands_in_capture_meta() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("{}", "application/json"))
            .mount(&upstream)
            .await;

        let (base, tmp) = start_proxy(&upstream.uri(), |_| {}).await;
        reqwest::Client::new()
            .post(format!("{base}/v1/responses"))
            .header("x-session-id", "sess-42")
            .body(r#"{"prompt_cache_key": "workspace-7", "input": "hi"}"#)
            .send()
            .await
            .unwrap();

        let dir = the_capture_dir(tmp.path());
        let meta = read_json(&dir.join("capture.meta.json"));
        assert_eq!(meta["cache_ident"]["prompt_cache_key"], "workspace-7");
        assert_eq!(meta["cache_ident"]["x-session-id"], "sess-42");
    }
}

mod streaming_tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SSE_BODY: &str = "data: {\"type\":\"response.output_text.delta\",\"delta\":\"hel\"}\n\n\
                            data: {\"type\":\"response.output_text.delta\",\"delta\":\"lo\"}\n\n\
                            data: {\"type\":\"response.completed\",\"usage\":{\"input_tokens\":10,\"input_tokens_details\":{\"cached_tokens\":4}}}\n\n\
                            data: [DONE]\n\n";

    fn sse_upstream_response() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(SSE_BODY, "text/event-stream")
    }

    #[tokio::test]
    async fn test_sse_relays_verbatim_and_extracts_usage() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/responses"))
            .respond_with(sse_upstream_response())
            .expect(1)
            .mount(&upstream)
            .await;

        let (base, tmp) = start_proxy(&upstream.uri(), |_| {}).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/v1/responses"))
            .body(r#"{"input": "hi", "stream": true}"#)
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["content-type"], "text/event-stream");
        let relayed = resp.bytes().await.unwrap();
        assert_eq!(&relayed[..], SSE_BODY.as_bytes(), "stream must relay byte-for-byte");

        let dir = the_capture_dir(tmp.path());
        let sse_path = wait_for_artifact(&dir, "response.sse.txt").await;
        assert_eq!(std::fs::read_to_string(sse_path).unwrap(), SSE_BODY);

        let meta_path = wait_for_artifact(&dir, "response.meta.json").await;
        let meta = read_json(&meta_path);
        assert_eq!(meta["streaming"], true);
        assert_eq!(meta["capture_truncated"], false);
        assert_eq!(meta["usage"]["input_tokens"], 10);
        assert_eq!(meta["usage"]["input_tokens_details"]["cached_tokens"], 4);
    }

    #[tokio::test]
    async fn test_accept_header_alone_selects_streaming() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(sse_upstream_response())
            .mount(&upstream)
            .await;

        let (base, tmp) = start_proxy(&upstream.uri(), |_| {}).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/v1/responses"))
            .header("accept", "text/event-stream")
            .body(r#"{"input": "hi"}"#)
            .send()
            .await
            .unwrap();
        let _ = resp.bytes().await.unwrap();

        let dir = the_capture_dir(tmp.path());
        let meta = read_json(&wait_for_artifact(&dir, "response.meta.json").await);
        assert_eq!(meta["streaming"], true);
    }

    #[tokio::test]
    async fn test_capture_cap_truncates_file_but_not_the_relay() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(sse_upstream_response())
            .mount(&upstream)
            .await;

        let (base, tmp) = start_proxy(&upstream.uri(), |cfg| {
            cfg.max_capture_bytes = 16;
        })
        .await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/v1/responses"))
            .body(r#"{"stream": true}"#)
            .send()
            .await
            .unwrap();
        let relayed = resp.bytes().await.unwrap();
        assert_eq!(
            relayed.len(),
            SSE_BODY.len(),
            "the client must still receive the whole stream"
        );

        let dir = the_capture_dir(tmp.path());
        let sse_path = wait_for_artifact(&dir, "response.sse.txt").await;
        assert_eq!(std::fs::read(sse_path).unwrap().len(), 16);

        let meta = read_json(&wait_for_artifact(&dir, "response.meta.json").await);
        assert_eq!(meta["capture_truncated"], true);
    }

    #[tokio::test]
    async fn test_sse_capture_can_be_disabled() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(sse_upstream_response())
            .mount(&upstream)
            .await;

        let (base, tmp) = start_proxy(&upstream.uri(), |cfg| {
            cfg.capture_sse_text = false;
        })
        .await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/v1/responses"))
            .body(r#"{"stream": true}"#)
            .send()
            .await
            .unwrap();
        let _ = resp.bytes().await.unwrap();

        let dir = the_capture_dir(tmp.path());
        let meta = read_json(&wait_for_artifact(&dir, "response.meta.json").await);
        // Usage still extracted from the in-memory capture even when the
        // text artifact is suppressed.
        assert_eq!(meta["usage"]["input_tokens"], 10);
        assert!(!dir.join("response.sse.txt").exists());
    }
}

mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_upstream_yields_structured_502() {
        // Port 1 is never listening; connects are refused immediately.
        let (base, tmp) = start_proxy("http://127.0.0.1:1", |_| {}).await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/v1/responses"))
            .body(r#"{"input": "hi"}"#)
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), 502);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["type"], "upstream_error");
        assert!(body["error"]["hint"]
            .as_str()
            .unwrap()
            .contains("CACHETAP_UPSTREAM_BASE_URL"));

        // Request-side artifacts were still captured; response meta was not.
        let dir = the_capture_dir(tmp.path());
        assert!(dir.join("request.body.json").is_file());
        assert!(!dir.join("response.meta.json").exists());
    }
}

mod analyzer_pipeline_tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// The analyzer must consume exactly what the proxy writes.
    #[tokio::test]
    async fn test_analyzer_summarizes_proxied_captures() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"usage":{"input_tokens":200,"input_tokens_details":{"cached_tokens":50}}}"#,
                "application/json",
            ))
            .expect(2)
            .mount(&upstream)
            .await;

        let (base, tmp) = start_proxy(&upstream.uri(), |_| {}).await;
        let client = reqwest::Client::new();
        for _ in 0..2 {
            let resp = client
                .post(format!("{base}/v1/responses"))
                .body(r#"{"prompt_cache_key": "workspace-7", "input": "hi"}"#)
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 200);
        }

        let entries = cachetap::analyze::find_captures(tmp.path()).unwrap();
        assert_eq!(entries.len(), 2);

        let summary = cachetap::analyze::summarize(&entries);
        assert_eq!(summary.input_tokens, 400);
        assert_eq!(summary.cached_tokens, 100);
        assert!((summary.hit_rate - 0.25).abs() < 1e-9);
        assert_eq!(summary.groups, vec![("workspace-7".to_string(), 2)]);

        let report = cachetap::analyze::render(&summary);
        assert!(report.contains("cache_hit_rate: 0.250"));
    }
}
