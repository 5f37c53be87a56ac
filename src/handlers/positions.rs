use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    models::{NewPosition, Position},
    services::Assignment,
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Deserialize, Default)]
pub struct AvailableQuery {
    pub area: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub volume_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct LayoutRequest {
    pub carregamento_id: String,
    pub rows: u32,
}

/// Upper bound on rows provisioned by one request.
const MAX_LAYOUT_ROWS: u32 = 200;

pub async fn ensure_position(
    State(state): State<AppState>,
    Json(payload): Json<NewPosition>,
) -> ApiResult<Position> {
    let position = state.services.allocator.ensure_position(payload).await?;
    Ok(Json(ApiResponse::success(position)))
}

pub async fn list_available(
    State(state): State<AppState>,
    Query(query): Query<AvailableQuery>,
) -> ApiResult<Vec<Position>> {
    let area = query.area.as_deref().filter(|a| !a.trim().is_empty());
    let positions = state.services.allocator.list_available(area).await?;
    Ok(Json(ApiResponse::success(positions)))
}

pub async fn list_available_for_volume(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<Position>> {
    let positions = state
        .services
        .allocator
        .list_available_for_volume(id)
        .await?;
    Ok(Json(ApiResponse::success(positions)))
}

pub async fn get_position(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Position> {
    let position = state.services.allocator.get_position(&code).await?;
    Ok(Json(ApiResponse::success(position)))
}

pub async fn provision_layout(
    State(state): State<AppState>,
    Json(payload): Json<LayoutRequest>,
) -> ApiResult<Vec<Position>> {
    if payload.rows > MAX_LAYOUT_ROWS {
        return Err(ServiceError::ValidationError(format!(
            "rows must be at most {}",
            MAX_LAYOUT_ROWS
        )));
    }
    let positions = state
        .services
        .allocator
        .provision_layout(&payload.carregamento_id, payload.rows)
        .await?;
    Ok(Json(ApiResponse::success(positions)))
}

pub async fn assign_volume(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(payload): Json<AssignRequest>,
) -> ApiResult<Assignment> {
    let assignment = state
        .services
        .allocator
        .assign(payload.volume_id, &code)
        .await?;
    Ok(Json(ApiResponse::success(assignment)))
}

pub async fn release_position(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Position> {
    let allocator = &state.services.allocator;
    allocator.release(&code).await?;
    let position = allocator.get_position(&code).await?;
    Ok(Json(
        ApiResponse::success(position).with_message("Position released"),
    ))
}
