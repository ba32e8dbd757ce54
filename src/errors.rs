use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, error_type, msg, hint) = match &self {
            ProxyError::Upstream(e) => (
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                e.clone(),
                "Check CACHETAP_UPSTREAM_BASE_URL / CACHETAP_UPSTREAM_API_KEY and upstream availability.",
            ),
            ProxyError::Internal(e) => {
                tracing::error!("internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    format!("{e}"),
                    "See the proxy logs for details.",
                )
            }
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": msg,
                "hint": hint,
            }
        }));

        (status, body).into_response()
    }
}
