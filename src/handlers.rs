use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;

use crate::rate_limit_config::LimiterSettings;
use crate::response::{HealthResponse, LimitsResponse};
use crate::store::CounterStore;

/// Shared application state
pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub store: Arc<dyn CounterStore>,
    pub settings: LimiterSettings,
}

/// Route protected by the admission middleware
pub async fn hello() -> &'static str {
    "Hello, World!"
}

/// Health check endpoint
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    let connected = state.store.ping().await.is_ok();
    Json(HealthResponse::new(state.store.name(), connected))
}

/// Readiness check endpoint; not ready while the store is unreachable
pub async fn readiness_check(State(state): State<SharedState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "store": state.store.name(),
            })),
        ),
        Err(err) => {
            tracing::warn!(error = %err, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "store": state.store.name(),
                    "error": err.to_string(),
                })),
            )
        }
    }
}

/// Active limiter settings
pub async fn get_limits(State(state): State<SharedState>) -> impl IntoResponse {
    Json(LimitsResponse::new(&state.settings))
}
