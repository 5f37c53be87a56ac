use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::time::Instant;

use crate::handlers::AppState;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub version: &'static str,
    pub store: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub latency_ms: u128,
    pub timestamp: String,
}

/// Liveness plus a store ping; a down store answers 503.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let start = Instant::now();
    let ping = state.services.store.ping().await;

    let (status, code, message) = match ping {
        Ok(()) => (ComponentStatus::Up, StatusCode::OK, None),
        Err(err) => (
            ComponentStatus::Down,
            StatusCode::SERVICE_UNAVAILABLE,
            Some(err.to_string()),
        ),
    };

    let body = HealthResponse {
        status: status.clone(),
        version: env!("CARGO_PKG_VERSION"),
        store: status,
        message,
        latency_ms: start.elapsed().as_millis(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    (code, Json(body))
}
