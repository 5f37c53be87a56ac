use axum::{extract::State, http::StatusCode, response::Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    models::NewVolume,
    services::{LabelLayout, PrintBatch, PrintFormat, PrintOutcome},
    ApiResponse, AppState,
};

#[derive(Debug, Deserialize)]
pub struct PrintRequest {
    pub volume: NewVolume,
    #[serde(default)]
    pub siblings: Vec<NewVolume>,
    #[serde(default)]
    pub format: Option<PrintFormat>,
    #[serde(default)]
    pub layout: Option<LabelLayout>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmPrintRequest {
    pub pending: PrintBatch,
    #[serde(default)]
    pub format: Option<PrintFormat>,
    #[serde(default)]
    pub layout: Option<LabelLayout>,
}

#[derive(Debug, Deserialize)]
pub struct ReprintRequest {
    pub volume_id: Uuid,
    #[serde(default)]
    pub sibling_ids: Vec<Uuid>,
    #[serde(default)]
    pub format: Option<PrintFormat>,
    #[serde(default)]
    pub layout: Option<LabelLayout>,
}

fn print_options(
    state: &AppState,
    format: Option<PrintFormat>,
    layout: Option<LabelLayout>,
) -> (PrintFormat, LabelLayout) {
    (
        format.unwrap_or_else(|| state.config.print_format()),
        layout.unwrap_or_else(|| state.config.label_layout()),
    )
}

/// Answers 200 when printed and 202 when the caller must confirm first.
fn outcome_response(outcome: PrintOutcome) -> (StatusCode, Json<ApiResponse<PrintOutcome>>) {
    match outcome {
        PrintOutcome::NeedsConfirmation { existing_count, .. } => {
            let message = format!(
                "{} labels already exist for this document; confirm to print again",
                existing_count
            );
            (
                StatusCode::ACCEPTED,
                Json(ApiResponse::success(outcome).with_message(message)),
            )
        }
        PrintOutcome::Printed { .. } => (StatusCode::OK, Json(ApiResponse::success(outcome))),
    }
}

pub async fn request_print(
    State(state): State<AppState>,
    Json(payload): Json<PrintRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PrintOutcome>>), ServiceError> {
    let (format, layout) = print_options(&state, payload.format, payload.layout);
    let outcome = state
        .services
        .printing
        .request_print(payload.volume, payload.siblings, format, layout)
        .await?;
    Ok(outcome_response(outcome))
}

pub async fn confirm_print(
    State(state): State<AppState>,
    Json(payload): Json<ConfirmPrintRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PrintOutcome>>), ServiceError> {
    let format = payload.format.unwrap_or(payload.pending.format);
    let layout = payload.layout.unwrap_or(payload.pending.layout);
    let outcome = state
        .services
        .printing
        .confirm_and_print(payload.pending, format, layout)
        .await?;
    Ok(outcome_response(outcome))
}

pub async fn reprint(
    State(state): State<AppState>,
    Json(payload): Json<ReprintRequest>,
) -> Result<StatusCode, ServiceError> {
    let (format, layout) = print_options(&state, payload.format, payload.layout);
    state
        .services
        .printing
        .reprint(payload.volume_id, &payload.sibling_ids, format, layout)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
