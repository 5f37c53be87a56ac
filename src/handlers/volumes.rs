use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    models::{NewMotherLabel, NewVolume, Volume, VolumeEvent},
    services::ClassificationRequest,
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Deserialize)]
pub struct VolumeListQuery {
    pub nota_fiscal_id: String,
    /// Only labels that still count as live for the document
    #[serde(default)]
    pub active: bool,
}

/// Volume plus derived fields the floor UI shows next to a label.
#[derive(Debug, Serialize)]
pub struct VolumeView {
    #[serde(flatten)]
    pub volume: Volume,
    pub cubagem_m3: Option<f64>,
}

impl From<Volume> for VolumeView {
    fn from(volume: Volume) -> Self {
        Self {
            cubagem_m3: volume.cubagem_m3(),
            volume,
        }
    }
}

/// Movements callers may request directly. Printing, storing and
/// invalidation go through their dedicated endpoints.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MovementEvent {
    Ship,
    Receive,
}

impl From<MovementEvent> for VolumeEvent {
    fn from(event: MovementEvent) -> Self {
        match event {
            MovementEvent::Ship => VolumeEvent::Ship,
            MovementEvent::Receive => VolumeEvent::Receive,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct UnitizeRequest {
    pub mother_id: Uuid,
    pub child_ids: Vec<Uuid>,
}

pub async fn create_volume(
    State(state): State<AppState>,
    Json(payload): Json<NewVolume>,
) -> Result<(StatusCode, Json<ApiResponse<VolumeView>>), ServiceError> {
    let volume = state.services.registry.create(payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(VolumeView::from(volume))),
    ))
}

pub async fn list_volumes(
    State(state): State<AppState>,
    Query(query): Query<VolumeListQuery>,
) -> ApiResult<Vec<VolumeView>> {
    let registry = &state.services.registry;
    let volumes = if query.active {
        registry.active_for_document(&query.nota_fiscal_id).await?
    } else {
        registry.list_by_document(&query.nota_fiscal_id).await?
    };
    Ok(Json(ApiResponse::success(
        volumes.into_iter().map(VolumeView::from).collect(),
    )))
}

pub async fn get_volume(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<VolumeView> {
    let volume = state.services.registry.get(id).await?;
    Ok(Json(ApiResponse::success(VolumeView::from(volume))))
}

pub async fn get_volume_by_code(
    State(state): State<AppState>,
    Path(codigo): Path<String>,
) -> ApiResult<VolumeView> {
    match state.services.registry.find_by_code(&codigo).await? {
        Some(volume) => Ok(Json(ApiResponse::success(VolumeView::from(volume)))),
        None => Err(ServiceError::NotFound(format!(
            "Volume with code {} not found",
            codigo
        ))),
    }
}

pub async fn delete_volume(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ServiceError> {
    state.services.registry.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_mother_label(
    State(state): State<AppState>,
    Json(payload): Json<NewMotherLabel>,
) -> Result<(StatusCode, Json<ApiResponse<Volume>>), ServiceError> {
    let mother = state.services.registry.create_mother_label(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(mother))))
}

pub async fn unitize(
    State(state): State<AppState>,
    Json(payload): Json<UnitizeRequest>,
) -> ApiResult<Volume> {
    if payload.child_ids.is_empty() {
        return Err(ServiceError::ValidationError(
            "child_ids must not be empty".to_string(),
        ));
    }
    let mother = state
        .services
        .registry
        .unitize(payload.mother_id, &payload.child_ids)
        .await?;
    Ok(Json(
        ApiResponse::success(mother).with_message("Volumes unitized"),
    ))
}

pub async fn transition_volume(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(event): Json<MovementEvent>,
) -> ApiResult<VolumeView> {
    let volume = state
        .services
        .registry
        .transition(id, event.into())
        .await?;
    Ok(Json(ApiResponse::success(VolumeView::from(volume))))
}

pub async fn invalidate_volume(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<InvalidateRequest>,
) -> ApiResult<VolumeView> {
    let volume = state
        .services
        .registry
        .invalidate(id, &payload.reason)
        .await?;
    Ok(Json(ApiResponse::success(VolumeView::from(volume))))
}

pub async fn classify_volume(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ClassificationRequest>,
) -> ApiResult<VolumeView> {
    let volume = state.services.classification.classify(id, payload).await?;
    Ok(Json(ApiResponse::success(VolumeView::from(volume))))
}
