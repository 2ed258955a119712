//! HTTP surface: OpenAI wire adapter and admin endpoints.
//!
//! Handlers stay thin; everything interesting lives in the core modules.

mod admin;
mod openai;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::jobs::JobManager;
use crate::registry::ProviderRegistry;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ProviderRegistry>,
    pub jobs: Arc<JobManager>,
    pub config: Arc<GatewayConfig>,
}

/// Build the HTTP router for the gateway.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // OpenAI wire surface
        .route("/v1/chat/completions", post(openai::chat_completions))
        .route("/v1/models", get(openai::list_models))
        // Admin surface
        .route("/admin/providers", get(admin::list_providers))
        .route("/admin/models", get(admin::list_models))
        .route("/admin/health", get(admin::health_snapshot))
        .route("/admin/health/{model}", get(admin::model_health))
        .route("/admin/providers/{id}/login", post(admin::start_login))
        .route("/admin/providers/{id}/auth-status", get(admin::auth_status))
        .route("/admin/providers/{id}/rate-limits", get(admin::rate_limits))
        .route("/admin/jobs", get(admin::list_jobs))
        .route("/admin/jobs/{id}", get(admin::get_job))
        .route("/admin/cli", post(admin::run_cli))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ))
        // Liveness, outside the auth layer
        .route("/health", get(health_check))
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

/// Bearer-token check applied when an API key is configured.
async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.config.server.api_key.as_deref() else {
        return next.run(request).await;
    };
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected);
    if authorized {
        next.run(request).await
    } else {
        error_response(
            StatusCode::UNAUTHORIZED,
            "invalid_api_key",
            "Invalid or missing API key",
        )
    }
}

/// OpenAI-style error body.
pub(crate) fn error_response(
    status: StatusCode,
    code: &str,
    message: impl Into<String>,
) -> Response {
    let body = serde_json::json!({
        "error": {
            "message": message.into(),
            "type": code,
            "code": code,
        }
    });
    (status, Json(body)).into_response()
}

/// Map a gateway error onto the wire.
pub(crate) fn map_error(err: &GatewayError) -> Response {
    let (status, code) = match err {
        GatewayError::InvalidModel(_) => (StatusCode::NOT_FOUND, "model_not_found"),
        GatewayError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error"),
        GatewayError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "provider_timeout"),
        GatewayError::ProviderExit { .. } | GatewayError::Parse(_) | GatewayError::Spawn(_) => {
            (StatusCode::BAD_GATEWAY, "provider_error")
        }
        GatewayError::ChainExhausted(_) => (StatusCode::BAD_GATEWAY, "fallback_exhausted"),
    };
    error_response(status, code, err.to_string())
}
