//! Volume Registry
//!
//! Owns volume records and the status state machine. Every status change is
//! a conditional write on the status the caller observed, so two concurrent
//! transitions on one volume never both succeed.

use std::sync::Arc;

use chrono::{FixedOffset, Offset, Utc};
use metrics::counter;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::errors::{PartialCommitReport, ServiceError};
use crate::models::{
    LabelKind, NewMotherLabel, NewVolume, Volume, VolumeEvent, VolumeStatus, VolumeType,
};
use crate::store::{
    fields, from_record, to_record, EntityKind, Filter, Record, ResourceStore, StoreError,
};

/// Label timestamps are rendered in America/Sao_Paulo time by default.
pub const DEFAULT_LABEL_OFFSET_MINUTES: i32 = -180;

#[derive(Clone)]
pub struct VolumeRegistry {
    store: Arc<dyn ResourceStore>,
    label_offset: FixedOffset,
}

impl VolumeRegistry {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            store,
            label_offset: label_offset(DEFAULT_LABEL_OFFSET_MINUTES),
        }
    }

    pub fn with_label_offset_minutes(mut self, minutes: i32) -> Self {
        self.label_offset = label_offset(minutes);
        self
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    #[instrument(skip(self))]
    pub async fn find(&self, id: Uuid) -> Result<Option<Volume>, ServiceError> {
        self.store
            .get(EntityKind::Volume, &id.to_string())
            .await?
            .map(from_record)
            .transpose()
            .map_err(Into::into)
    }

    pub async fn get(&self, id: Uuid) -> Result<Volume, ServiceError> {
        self.find(id)
            .await?
            .ok_or_else(|| ServiceError::volume_not_found(id))
    }

    #[instrument(skip(self))]
    pub async fn find_by_code(&self, codigo: &str) -> Result<Option<Volume>, ServiceError> {
        let filter = Filter::new().eq("codigo", codigo);
        let mut volumes = self.query(&filter).await?;
        Ok(volumes.pop())
    }

    /// All labels for a document ordered by volume number, mother labels last.
    #[instrument(skip(self))]
    pub async fn list_by_document(&self, nota_fiscal_id: &str) -> Result<Vec<Volume>, ServiceError> {
        let filter = Filter::new().eq("nota_fiscal_id", nota_fiscal_id);
        let mut volumes = self.query(&filter).await?;
        volumes.sort_by_key(|v| (v.tipo == LabelKind::Mother, v.volume_numero, v.data_geracao));
        Ok(volumes)
    }

    /// Volume labels of a document that have not been invalidated.
    pub async fn active_for_document(
        &self,
        nota_fiscal_id: &str,
    ) -> Result<Vec<Volume>, ServiceError> {
        let filter = Filter::new()
            .eq("nota_fiscal_id", nota_fiscal_id)
            .eq("tipo", LabelKind::Volume.to_string())
            .ne("status", VolumeStatus::Invalidated.as_str());
        self.query(&filter).await
    }

    async fn query(&self, filter: &Filter) -> Result<Vec<Volume>, ServiceError> {
        self.store
            .find(EntityKind::Volume, filter)
            .await?
            .into_iter()
            .map(|record| from_record(record).map_err(ServiceError::from))
            .collect()
    }

    /// Persists a new volume in `gerada`.
    #[instrument(skip(self, candidate), fields(nota_fiscal_id = %candidate.nota_fiscal_id, volume_numero = candidate.volume_numero))]
    pub async fn create(&self, candidate: NewVolume) -> Result<Volume, ServiceError> {
        candidate.validate()?;
        self.ensure_number_is_free(&candidate, None).await?;

        let volume = candidate.into_volume(Utc::now(), self.label_offset);
        let record = to_record(&volume)?;
        self.store.insert(EntityKind::Volume, record).await?;

        counter!("volume_ledger.volume.created", 1);
        info!(volume_id = %volume.id, codigo = %volume.codigo, "Volume created");
        Ok(volume)
    }

    /// Creates the volume, or refreshes the attributes of an existing one
    /// that has not left the labeling stage.
    #[instrument(skip(self, candidate), fields(volume_id = ?candidate.id))]
    pub async fn save(&self, candidate: NewVolume) -> Result<Volume, ServiceError> {
        let existing = match candidate.id {
            Some(id) => self.find(id).await?,
            None => None,
        };
        match existing {
            Some(existing) => self.refresh(existing, candidate).await,
            None => self.create(candidate).await,
        }
    }

    async fn refresh(&self, existing: Volume, candidate: NewVolume) -> Result<Volume, ServiceError> {
        candidate.validate()?;
        if candidate.nota_fiscal_id != existing.nota_fiscal_id {
            return Err(ServiceError::ValidationError(format!(
                "Volume {} belongs to document {}",
                existing.id, existing.nota_fiscal_id
            )));
        }
        if !matches!(
            existing.status,
            VolumeStatus::Generated | VolumeStatus::Printed
        ) {
            return Err(ServiceError::conflict(
                existing.id,
                existing.status,
                "atualizacao",
            ));
        }
        if candidate.volume_numero != existing.volume_numero {
            self.ensure_number_is_free(&candidate, Some(existing.id))
                .await?;
        }

        let descricao = candidate
            .descricao
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| {
                format!("Volume {}/{}", candidate.volume_numero, candidate.total_volumes)
            });
        let (codigo_onu, codigo_risco, classificacao_quimica) = match candidate.tipo_volume {
            VolumeType::Chemical => (
                candidate.codigo_onu,
                candidate.codigo_risco,
                candidate.classificacao_quimica,
            ),
            VolumeType::General => (None, None, None),
        };
        let patch = fields(json!({
            "tipo_volume": candidate.tipo_volume,
            "area": candidate.area,
            "descricao": descricao,
            "quantidade": candidate.quantidade,
            "volume_numero": candidate.volume_numero,
            "total_volumes": candidate.total_volumes,
            "altura_cm": candidate.altura_cm,
            "largura_cm": candidate.largura_cm,
            "comprimento_cm": candidate.comprimento_cm,
            "peso_total_bruto": candidate.peso_total_bruto,
            "codigo_onu": codigo_onu,
            "codigo_risco": codigo_risco,
            "classificacao_quimica": classificacao_quimica,
            "updated_at": Utc::now(),
        }));
        let volume = self.write_if_status(&existing, patch, "atualizacao").await?;
        debug!(volume_id = %volume.id, "Volume attributes refreshed");
        Ok(volume)
    }

    async fn ensure_number_is_free(
        &self,
        candidate: &NewVolume,
        except: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        let filter = Filter::new()
            .eq("nota_fiscal_id", candidate.nota_fiscal_id.as_str())
            .eq("tipo", LabelKind::Volume.to_string())
            .eq("volume_numero", candidate.volume_numero)
            .ne("status", VolumeStatus::Invalidated.as_str());
        let clash = self
            .query(&filter)
            .await?
            .into_iter()
            .any(|v| Some(v.id) != except && Some(v.id) != candidate.id);
        if clash {
            return Err(ServiceError::ValidationError(format!(
                "Volume {} already exists for document {}",
                candidate.volume_numero, candidate.nota_fiscal_id
            )));
        }
        Ok(())
    }

    /// Applies `event` through the state machine.
    #[instrument(skip(self), fields(event = event.name()))]
    pub async fn transition(&self, id: Uuid, event: VolumeEvent) -> Result<Volume, ServiceError> {
        match &event {
            VolumeEvent::Invalidate { reason } if reason.trim().is_empty() => {
                return Err(ServiceError::ValidationError(
                    "A reason is required to invalidate a volume".to_string(),
                ));
            }
            VolumeEvent::Store { posicao } if posicao.trim().is_empty() => {
                return Err(ServiceError::ValidationError(
                    "A position is required to store a volume".to_string(),
                ));
            }
            _ => {}
        }

        let volume = self.get(id).await?;
        let next = volume.status.apply(volume.tipo, &event).ok_or_else(|| {
            counter!("volume_ledger.transition.rejected", 1, "event" => event.name());
            ServiceError::conflict(id, volume.status, event.target().as_str())
        })?;

        let now = Utc::now();
        let mut patch = fields(json!({
            "status": next,
            "updated_at": now,
        }));
        match &event {
            VolumeEvent::Print | VolumeEvent::Reprint => {
                patch.insert("data_impressao".into(), json!(now));
            }
            VolumeEvent::Store { posicao } => {
                patch.insert("posicao".into(), json!(posicao));
            }
            VolumeEvent::Unstore => {
                patch.insert("posicao".into(), Value::Null);
            }
            VolumeEvent::Invalidate { reason } => {
                patch.insert("motivo_inutilizacao".into(), json!(reason.trim()));
                patch.insert("data_inutilizacao".into(), json!(now));
            }
            VolumeEvent::Ship | VolumeEvent::Receive | VolumeEvent::Unitize => {}
        }

        let updated = self
            .write_if_status(&volume, patch, event.target().as_str())
            .await?;

        counter!("volume_ledger.transition.applied", 1, "event" => event.name());
        info!(
            volume_id = %id,
            from = %volume.status,
            to = %updated.status,
            "Volume transitioned"
        );
        Ok(updated)
    }

    /// Conditional write on the status observed in `volume`. A lost race is
    /// reported as a conflict naming the status actually found.
    pub(crate) async fn write_if_status(
        &self,
        volume: &Volume,
        patch: Record,
        requested: &str,
    ) -> Result<Volume, ServiceError> {
        let expected = fields(json!({ "status": volume.status }));
        match self
            .store
            .update_if(EntityKind::Volume, &volume.id.to_string(), &expected, patch)
            .await
        {
            Ok(record) => Ok(from_record(record)?),
            Err(StoreError::PreconditionFailed { .. }) => {
                let current = self.get(volume.id).await?;
                warn!(
                    volume_id = %volume.id,
                    expected = %volume.status,
                    found = %current.status,
                    "Concurrent status change detected"
                );
                Err(ServiceError::conflict(volume.id, current.status, requested))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Invalidates a volume with a mandatory reason.
    pub async fn invalidate(&self, id: Uuid, reason: &str) -> Result<Volume, ServiceError> {
        self.transition(
            id,
            VolumeEvent::Invalidate {
                reason: reason.to_string(),
            },
        )
        .await
    }

    /// Deletes a volume that was never printed. Printed volumes must be
    /// invalidated instead.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        let volume = self.get(id).await?;
        if volume.status != VolumeStatus::Generated {
            return Err(ServiceError::conflict(id, volume.status, "exclusao"));
        }
        self.store
            .delete(EntityKind::Volume, &id.to_string())
            .await?;
        info!(volume_id = %id, "Volume deleted");
        Ok(())
    }

    #[instrument(skip(self, request), fields(nota_fiscal_id = %request.nota_fiscal_id))]
    pub async fn create_mother_label(&self, request: NewMotherLabel) -> Result<Volume, ServiceError> {
        request.validate()?;
        let mother = request.into_volume(Utc::now(), self.label_offset);
        self.store
            .insert(EntityKind::Volume, to_record(&mother)?)
            .await?;
        info!(volume_id = %mother.id, codigo = %mother.codigo, "Mother label created");
        Ok(mother)
    }

    /// Links `child_ids` to a mother label and marks the mother `unitizada`
    /// once every child is linked.
    #[instrument(skip(self, child_ids), fields(children = child_ids.len()))]
    pub async fn unitize(&self, mother_id: Uuid, child_ids: &[Uuid]) -> Result<Volume, ServiceError> {
        if child_ids.is_empty() {
            return Err(ServiceError::ValidationError(
                "At least one volume is required for unitization".to_string(),
            ));
        }

        let mother = self.get(mother_id).await?;
        if mother.tipo != LabelKind::Mother {
            return Err(ServiceError::ValidationError(format!(
                "Volume {mother_id} is not a mother label"
            )));
        }
        if mother.status.apply(mother.tipo, &VolumeEvent::Unitize).is_none() {
            return Err(ServiceError::conflict(
                mother_id,
                mother.status,
                VolumeStatus::Unitized.as_str(),
            ));
        }

        let mut children = Vec::with_capacity(child_ids.len());
        for child_id in child_ids {
            let child = self.get(*child_id).await?;
            if child.tipo != LabelKind::Volume || child.nota_fiscal_id != mother.nota_fiscal_id {
                return Err(ServiceError::ValidationError(format!(
                    "Volume {child_id} cannot be unitized under {mother_id}"
                )));
            }
            if child.status.is_terminal() {
                return Err(ServiceError::conflict(child.id, child.status, "unitizacao"));
            }
            match child.etiqueta_mae_id {
                Some(other) if other != mother_id => {
                    return Err(ServiceError::ValidationError(format!(
                        "Volume {child_id} is already unitized under {other}"
                    )));
                }
                _ => children.push(child),
            }
        }

        let mut report = PartialCommitReport::default();
        for child in children {
            if child.etiqueta_mae_id == Some(mother_id) {
                report.succeeded.push(child.id);
                continue;
            }
            let expected = fields(json!({ "status": child.status, "etiqueta_mae_id": null }));
            let patch = fields(json!({ "etiqueta_mae_id": mother_id, "updated_at": Utc::now() }));
            match self
                .store
                .update_if(EntityKind::Volume, &child.id.to_string(), &expected, patch)
                .await
            {
                Ok(_) => report.succeeded.push(child.id),
                Err(err) => {
                    warn!(volume_id = %child.id, error = %err, "Failed to link volume to mother label");
                    report.failed.push(child.id);
                }
            }
        }

        if !report.failed.is_empty() {
            warn!(failed = ?report.failed, "Unitization partially committed");
            return Err(ServiceError::PartialCommit(report));
        }

        self.transition(mother_id, VolumeEvent::Unitize).await
    }
}

fn label_offset(minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(minutes * 60).unwrap_or_else(|| {
        warn!(minutes, "Label offset out of range; using UTC");
        Utc.fix()
    })
}
