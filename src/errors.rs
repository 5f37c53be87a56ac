use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::ValidationErrors;

use crate::models::VolumeStatus;
use crate::store::StoreError;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Standard error body returned by every endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    pub error: String,
    pub message: String,
    /// Structured details, e.g. the per-volume outcome of a partial commit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

/// Outcome of a multi-volume write where some volumes could not be committed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialCommitReport {
    pub succeeded: Vec<Uuid>,
    pub failed: Vec<Uuid>,
}

impl fmt::Display for PartialCommitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} volume(s) committed, {} failed",
            self.succeeded.len(),
            self.failed.len()
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Volume {volume_id} is {current}; cannot move to {requested}")]
    Conflict {
        volume_id: Uuid,
        current: VolumeStatus,
        requested: String,
    },

    #[error("Position {posicao} is occupied{}", describe_occupant(.occupant))]
    PositionOccupied {
        posicao: String,
        occupant: Option<Uuid>,
    },

    #[error("Partial commit: {0}")]
    PartialCommit(PartialCommitReport),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Print failed: {0}")]
    PrintFailed(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

fn describe_occupant(occupant: &Option<Uuid>) -> String {
    occupant
        .map(|id| format!(" by volume {id}"))
        .unwrap_or_default()
}

impl ServiceError {
    pub fn conflict(volume_id: Uuid, current: VolumeStatus, requested: impl Into<String>) -> Self {
        Self::Conflict {
            volume_id,
            current,
            requested: requested.into(),
        }
    }

    pub fn volume_not_found(id: Uuid) -> Self {
        Self::NotFound(format!("Volume {id} not found"))
    }

    pub fn position_not_found(code: &str) -> Self {
        Self::NotFound(format!("Position {code} not found"))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict { .. } | Self::PositionOccupied { .. } => StatusCode::CONFLICT,
            Self::PartialCommit(_) => StatusCode::MULTI_STATUS,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::PrintFailed(_) => StatusCode::BAD_GATEWAY,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to API clients; backend detail stays in the logs.
    pub fn response_message(&self) -> String {
        match self {
            Self::StoreUnavailable(_) => "Resource store is temporarily unavailable".to_string(),
            Self::InternalError(_) => "An internal error occurred".to_string(),
            _ => self.to_string(),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::PartialCommit(report) => serde_json::to_value(report).ok(),
            Self::Conflict {
                volume_id,
                current,
                requested,
            } => Some(serde_json::json!({
                "volume_id": volume_id,
                "current": current,
                "requested": requested,
            })),
            Self::PositionOccupied { posicao, occupant } => Some(serde_json::json!({
                "posicao": posicao,
                "occupant": occupant,
            })),
            _ => None,
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => ServiceError::StoreUnavailable(msg),
            StoreError::NotFound { kind, id } => {
                ServiceError::NotFound(format!("{kind} {id} not found"))
            }
            StoreError::Duplicate { kind, id } => {
                ServiceError::ValidationError(format!("{kind} {id} already exists"))
            }
            other @ (StoreError::PreconditionFailed { .. }
            | StoreError::InvalidRecord(_)
            | StoreError::Backend(_)) => ServiceError::InternalError(other.to_string()),
        }
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(errors: ValidationErrors) -> Self {
        ServiceError::ValidationError(describe_validation_errors(&errors))
    }
}

/// Flattens validator output into `field: message` pairs.
pub fn describe_validation_errors(errors: &ValidationErrors) -> String {
    let mut parts: Vec<String> = errors
        .field_errors()
        .iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| match &e.message {
                Some(message) => message.to_string(),
                None => format!("{field}: {}", e.code),
            })
        })
        .collect();
    parts.sort();
    if parts.is_empty() {
        errors.to_string()
    } else {
        parts.join("; ")
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: self.details(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}
