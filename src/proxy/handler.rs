use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Method, Uri};
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use crate::errors::ProxyError;
use crate::models::capture::{CacheIdentity, CaptureMeta, ResponseMeta};
use crate::proxy::stream_tee::{self, StreamCapture};
use crate::proxy::{sse, transform};
use crate::store::{CapturePaths, CaptureStore};
use crate::AppState;

/// Answered locally; never forwarded.
pub async fn health_handler() -> Json<Value> {
    Json(json!({ "ok": "true" }))
}

/// The catch-all handler: every request that is not `/health` lands here,
/// gets captured, and is forwarded to the configured upstream.
#[tracing::instrument(skip_all, fields(method = %method, path = %uri.path()))]
pub async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let start = Instant::now();
    let cfg = &state.config;

    // -- 1. Allocate the capture --
    // Directory allocation mints the request identity; if it fails nothing
    // else can be recorded, so this is the one persistence error that
    // surfaces to the client.
    let paths = state
        .store
        .create_capture()
        .await
        .map_err(ProxyError::Internal)?;
    tracing::debug!(request_id = %paths.request_id, "capture allocated");

    // -- 2. Classify --
    let parsed = transform::parse_body(&body);
    let streaming = transform::wants_stream(&headers, parsed.as_ref());
    let cache_ident = CacheIdentity::extract(&headers, parsed.as_ref());

    // -- 3. Persist request-side artifacts --
    best_effort(
        &paths,
        "request headers",
        state
            .store
            .save_request_headers(
                &paths,
                &transform::headers_to_json(&headers, cfg.log_sensitive_headers),
            )
            .await,
    );
    best_effort(
        &paths,
        "raw request body",
        state.store.save_request_body(&paths, &body).await,
    );
    best_effort(
        &paths,
        "normalized request body",
        state
            .store
            .save_request_normalized(&paths, &transform::normalized_body(&body, parsed.as_ref()))
            .await,
    );
    best_effort(
        &paths,
        "capture metadata",
        state
            .store
            .save_capture_meta(
                &paths,
                &CaptureMeta {
                    method: method.to_string(),
                    path: uri.path().to_string(),
                    query: uri.query().map(str::to_string),
                    cache_ident,
                    captured_at: Utc::now(),
                },
            )
            .await,
    );

    // -- 4. Forward --
    let resolved = transform::resolve_path(uri.path(), &cfg.upstream_responses_path);
    let upstream_url =
        transform::build_upstream_url(&cfg.upstream_base_url, &resolved, uri.query());
    let upstream_headers =
        transform::build_upstream_headers(&headers, cfg.upstream_api_key.as_deref());

    let upstream_resp = state
        .upstream
        .forward(method, &upstream_url, upstream_headers, body.clone())
        .await?;

    let status = upstream_resp.status();
    let resp_headers = transform::client_response_headers(upstream_resp.headers());

    // -- 5a. Streaming: relay immediately, capture off the hot path --
    if streaming {
        let store = state.store.clone();
        let capture_sse = cfg.capture_sse_text;
        let meta_paths = paths.clone();
        let meta_url = upstream_url.clone();
        let status_code = status.as_u16();

        let relayed = stream_tee::tee_upstream_stream(
            upstream_resp,
            StreamCapture::new(cfg.max_capture_bytes),
            move |capture| async move {
                persist_stream_capture(
                    store,
                    meta_paths,
                    meta_url,
                    status_code,
                    start,
                    capture_sse,
                    capture,
                )
                .await;
            },
        );

        let mut builder = Response::builder().status(status);
        for (name, value) in resp_headers.iter() {
            builder = builder.header(name, value);
        }
        return builder
            .body(relayed)
            .map_err(|e| ProxyError::Internal(anyhow::anyhow!("response build failed: {e}")));
    }

    // -- 5b. Non-streaming: buffer the body, persist, respond --
    let resp_body = upstream_resp
        .bytes()
        .await
        .map_err(|e| ProxyError::Upstream(format!("upstream body read failed: {e}")))?;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    let parsed_resp: Option<Value> = serde_json::from_slice(&resp_body).ok();
    let usage = parsed_resp
        .as_ref()
        .and_then(|v| v.get("usage"))
        .filter(|u| u.is_object())
        .cloned();

    if cfg.capture_response_body {
        if let Some(parsed) = &parsed_resp {
            best_effort(
                &paths,
                "response body",
                state.store.save_response_body(&paths, parsed).await,
            );
        }
    }
    best_effort(
        &paths,
        "response metadata",
        state
            .store
            .save_response_meta(
                &paths,
                &ResponseMeta {
                    upstream_url,
                    status_code: status.as_u16(),
                    elapsed_ms,
                    captured_at: Utc::now(),
                    usage,
                    streaming: None,
                    capture_truncated: None,
                },
            )
            .await,
    );

    let mut builder = Response::builder().status(status);
    for (name, value) in resp_headers.iter() {
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from(resp_body))
        .map_err(|e| ProxyError::Internal(anyhow::anyhow!("response build failed: {e}")))
}

/// Runs once per streamed request, after the relay loop ends — on upstream
/// EOF, client disconnect, and upstream error alike.
async fn persist_stream_capture(
    store: CaptureStore,
    paths: CapturePaths,
    upstream_url: String,
    status_code: u16,
    start: Instant,
    capture_sse: bool,
    capture: StreamCapture,
) {
    let truncated = capture.truncated();
    let total_bytes = capture.total_bytes();
    let text = capture.into_text();
    let usage = sse::extract_usage(&text);

    if capture_sse {
        best_effort(
            &paths,
            "sse text",
            store.save_response_sse(&paths, &text).await,
        );
    }
    best_effort(
        &paths,
        "response metadata",
        store
            .save_response_meta(
                &paths,
                &ResponseMeta {
                    upstream_url,
                    status_code,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                    captured_at: Utc::now(),
                    usage,
                    streaming: Some(true),
                    capture_truncated: Some(truncated),
                },
            )
            .await,
    );
    tracing::debug!(
        request_id = %paths.request_id,
        total_bytes,
        truncated,
        "stream capture persisted"
    );
}

/// Capture writes never affect what the client gets back; failures are
/// logged and dropped.
fn best_effort(paths: &CapturePaths, what: &str, result: anyhow::Result<()>) {
    if let Err(e) = result {
        tracing::warn!(request_id = %paths.request_id, "failed to persist {what}: {e:#}");
    }
}
