//! cachetap — diagnostic logging reverse proxy for LLM Responses APIs.
//!
//! The binary in `main.rs` is a thin wrapper; the router and all proxy
//! logic live here so integration tests can drive the full pipeline against
//! an in-process listener.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{any, get};
use axum::Router;

pub mod analyze;
pub mod cli;
pub mod config;
pub mod errors;
pub mod models;
pub mod normalize;
pub mod proxy;
pub mod store;

/// Shared application state passed to handlers.
pub struct AppState {
    pub config: config::ProxyConfig,
    pub store: store::CaptureStore,
    pub upstream: proxy::upstream::UpstreamClient,
}

/// Build the router: one local health route, everything else captured and
/// forwarded.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(proxy::handler::health_handler))
        .fallback(any(proxy::handler::proxy_handler))
        .with_state(state)
        // Transparency: never reject a body the real upstream might accept.
        .layer(DefaultBodyLimit::disable())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
