//! Volume label lifecycle and warehouse slot allocation.
//!
//! The crate is layered bottom-up: [`store`] persists keyed records,
//! [`services`] implement the registry, allocator, print coordinator and
//! classification on top of it, and [`handlers`] expose them over HTTP.

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod models;
pub mod services;
pub mod store;
pub mod tracing;

use std::time::Duration;

use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};

pub use handlers::AppServices;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: config::AppConfig,
    pub services: AppServices,
}

impl AppState {
    pub fn new(config: config::AppConfig, services: AppServices) -> Self {
        Self { config, services }
    }
}

/// Standard success envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

pub fn api_v1_routes() -> Router<AppState> {
    let volumes = Router::new()
        .route(
            "/volumes",
            post(handlers::volumes::create_volume).get(handlers::volumes::list_volumes),
        )
        .route(
            "/volumes/mother",
            post(handlers::volumes::create_mother_label),
        )
        .route("/volumes/unitize", post(handlers::volumes::unitize))
        .route(
            "/volumes/by-code/:codigo",
            get(handlers::volumes::get_volume_by_code),
        )
        .route(
            "/volumes/:id",
            get(handlers::volumes::get_volume).delete(handlers::volumes::delete_volume),
        )
        .route(
            "/volumes/:id/transitions",
            post(handlers::volumes::transition_volume),
        )
        .route(
            "/volumes/:id/invalidate",
            post(handlers::volumes::invalidate_volume),
        )
        .route(
            "/volumes/:id/classify",
            post(handlers::volumes::classify_volume),
        )
        .route(
            "/volumes/:id/available-positions",
            get(handlers::positions::list_available_for_volume),
        );

    let positions = Router::new()
        .route("/positions", post(handlers::positions::ensure_position))
        .route(
            "/positions/available",
            get(handlers::positions::list_available),
        )
        .route("/positions/layout", post(handlers::positions::provision_layout))
        .route("/positions/:code", get(handlers::positions::get_position))
        .route(
            "/positions/:code/assign",
            post(handlers::positions::assign_volume),
        )
        .route(
            "/positions/:code/release",
            post(handlers::positions::release_position),
        );

    let labels = Router::new()
        .route("/labels/print", post(handlers::labels::request_print))
        .route(
            "/labels/print/confirm",
            post(handlers::labels::confirm_print),
        )
        .route("/labels/reprint", post(handlers::labels::reprint));

    Router::new()
        .merge(volumes)
        .merge(positions)
        .merge(labels)
}

/// Full application router with health, middleware and CORS applied.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    let timeout = Duration::from_secs(state.config.request_timeout_secs);

    Router::new()
        .route("/health", get(handlers::health::health))
        .nest("/api/v1", api_v1_routes())
        .layer(TimeoutLayer::new(timeout))
        .layer(cors)
        .layer(crate::tracing::configure_http_tracing())
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}

fn cors_layer(config: &config::AppConfig) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::DELETE, Method::OPTIONS];
    if config.has_cors_allowed_origins() {
        let origins: Vec<HeaderValue> = config
            .cors_allowed_origins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .filter_map(|origin| HeaderValue::from_str(origin.trim()).ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(Any)
    } else if config.should_allow_permissive_cors() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new().allow_methods(methods)
    }
}
