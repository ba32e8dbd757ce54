//! HTTP client for forwarding requests to the upstream API.
//!
//! One pooled client for the process. No automatic retries and no total
//! request timeout: every client request maps to exactly one upstream
//! attempt, and SSE responses may legitimately stream for minutes. Stall
//! detection comes from the per-read timeout instead.

use std::time::Duration;

use anyhow::Context;
use axum::http::{HeaderMap, Method};
use bytes::Bytes;

use crate::errors::ProxyError;

pub struct UpstreamClient {
    client: reqwest::Client,
}

impl UpstreamClient {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(32)
            .connect_timeout(Duration::from_secs(30))
            .read_timeout(Duration::from_secs(120))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { client })
    }

    pub async fn forward(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<reqwest::Response, ProxyError> {
        let resp = self
            .client
            .request(method, url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(url = %url, "upstream request failed: {}", e);
                ProxyError::Upstream(e.to_string())
            })?;

        Ok(resp)
    }
}
