use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::errors::ServiceError;
use crate::models::{check_hazard_fields, Volume, VolumeStatus, VolumeType};
use crate::services::volume_registry::VolumeRegistry;
use crate::store::fields;

/// Placeholder the floor UI sends for "no chemical class".
const UNCLASSIFIED: &str = "nao_classificada";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_classification"))]
pub struct ClassificationRequest {
    #[serde(default)]
    pub tipo_volume: VolumeType,
    pub area: String,
    #[serde(default)]
    pub codigo_onu: Option<String>,
    #[serde(default)]
    pub codigo_risco: Option<String>,
    #[serde(default)]
    pub classificacao: Option<String>,
}

const MAX_AREA_LEN: usize = 32;

fn validate_classification(request: &ClassificationRequest) -> Result<(), ValidationError> {
    let area = request.area.trim();
    if area.is_empty() || area.len() > MAX_AREA_LEN {
        let mut err = ValidationError::new("area");
        err.message = Some("area is required and must have at most 32 characters".into());
        return Err(err);
    }
    check_hazard_fields(
        request.tipo_volume,
        request.codigo_onu.as_deref(),
        request.codigo_risco.as_deref(),
    )
}

/// Records volume type, storage area and hazard data.
#[derive(Clone)]
pub struct ClassificationService {
    registry: Arc<VolumeRegistry>,
}

impl ClassificationService {
    pub fn new(registry: Arc<VolumeRegistry>) -> Self {
        Self { registry }
    }

    #[instrument(skip(self, request), fields(tipo_volume = %request.tipo_volume, area = %request.area))]
    pub async fn classify(
        &self,
        volume_id: Uuid,
        request: ClassificationRequest,
    ) -> Result<Volume, ServiceError> {
        request.validate()?;

        let volume = self.registry.get(volume_id).await?;
        if !matches!(
            volume.status,
            VolumeStatus::Generated | VolumeStatus::Printed | VolumeStatus::Received
        ) {
            return Err(ServiceError::conflict(
                volume_id,
                volume.status,
                "classificacao",
            ));
        }

        let (codigo_onu, codigo_risco, classificacao) = match request.tipo_volume {
            VolumeType::Chemical => (
                trimmed(request.codigo_onu),
                trimmed(request.codigo_risco),
                trimmed(request.classificacao).filter(|c| c != UNCLASSIFIED),
            ),
            VolumeType::General => (None, None, None),
        };

        let patch = fields(json!({
            "tipo_volume": request.tipo_volume,
            "area": request.area.trim(),
            "codigo_onu": codigo_onu,
            "codigo_risco": codigo_risco,
            "classificacao_quimica": classificacao,
            "updated_at": Utc::now(),
        }));
        let updated = self
            .registry
            .write_if_status(&volume, patch, "classificacao")
            .await?;

        counter!("volume_ledger.classification.applied", 1);
        info!(
            volume_id = %volume_id,
            tipo_volume = %updated.tipo_volume,
            "Volume classified"
        );
        Ok(updated)
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
