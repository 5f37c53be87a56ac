//! Slot Allocator
//!
//! Binds volumes to storage positions. A position is claimed with a
//! conditional write on `volume_id IS NULL` before the volume moves to
//! `armazenada`; if that transition fails the claim is rolled back.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strum::IntoEnumIterator;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::errors::ServiceError;
use crate::models::{
    LayoutColumn, NewPosition, Position, Volume, VolumeEvent, VolumeStatus,
};
use crate::services::volume_registry::VolumeRegistry;
use crate::store::{
    fields, from_record, to_record, EntityKind, Filter, ResourceStore, StoreError,
};

/// Result of a successful binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub position: Position,
    pub volume: Volume,
}

#[derive(Clone)]
pub struct SlotAllocator {
    store: Arc<dyn ResourceStore>,
    registry: Arc<VolumeRegistry>,
}

impl SlotAllocator {
    pub fn new(store: Arc<dyn ResourceStore>, registry: Arc<VolumeRegistry>) -> Self {
        Self { store, registry }
    }

    pub async fn find_position(&self, code: &str) -> Result<Option<Position>, ServiceError> {
        self.store
            .get(EntityKind::Position, code)
            .await?
            .map(from_record)
            .transpose()
            .map_err(Into::into)
    }

    pub async fn get_position(&self, code: &str) -> Result<Position, ServiceError> {
        self.find_position(code)
            .await?
            .ok_or_else(|| ServiceError::position_not_found(code))
    }

    /// Free positions, optionally restricted to one area, in natural order.
    #[instrument(skip(self))]
    pub async fn list_available(&self, area: Option<&str>) -> Result<Vec<Position>, ServiceError> {
        let mut filter = Filter::new().is_null("volume_id");
        if let Some(area) = area {
            filter = filter.eq("area", area);
        }
        let mut positions = self
            .store
            .find(EntityKind::Position, &filter)
            .await?
            .into_iter()
            .map(|record| from_record::<Position>(record).map_err(ServiceError::from))
            .collect::<Result<Vec<_>, _>>()?;
        positions.sort_by_key(Position::sort_key);
        Ok(positions)
    }

    /// Free positions in the volume's classified area.
    pub async fn list_available_for_volume(
        &self,
        volume_id: Uuid,
    ) -> Result<Vec<Position>, ServiceError> {
        let volume = self.registry.get(volume_id).await?;
        let area = volume.area.as_deref().ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "Volume {volume_id} has no storage area; classify it first"
            ))
        })?;
        self.list_available(Some(area)).await
    }

    /// Returns the existing position or creates it.
    #[instrument(skip(self, request), fields(posicao = %request.posicao))]
    pub async fn ensure_position(&self, request: NewPosition) -> Result<Position, ServiceError> {
        request.validate()?;
        if let Some(existing) = self.find_position(&request.posicao).await? {
            return Ok(existing);
        }

        let code = request.posicao.clone();
        let position = request.into_position(Utc::now());
        match self
            .store
            .insert(EntityKind::Position, to_record(&position)?)
            .await
        {
            Ok(_) => {
                debug!(posicao = %code, "Position created");
                Ok(position)
            }
            Err(StoreError::Duplicate { .. }) => self.get_position(&code).await,
            Err(err) => Err(err.into()),
        }
    }

    /// Creates the `E{n}`/`C{n}`/`D{n}` positions of a truck layout.
    #[instrument(skip(self))]
    pub async fn provision_layout(
        &self,
        carregamento_id: &str,
        rows: u32,
    ) -> Result<Vec<Position>, ServiceError> {
        if rows == 0 {
            return Err(ServiceError::ValidationError(
                "A layout needs at least one row".to_string(),
            ));
        }

        let mut positions = Vec::with_capacity(rows as usize * 3);
        for row in 1..=rows {
            for column in LayoutColumn::iter() {
                let position = self
                    .ensure_position(NewPosition {
                        posicao: column.code(row),
                        area: None,
                        classe_capacidade: None,
                        carregamento_id: Some(carregamento_id.to_string()),
                    })
                    .await?;
                positions.push(position);
            }
        }
        info!(carregamento_id, count = positions.len(), "Layout provisioned");
        Ok(positions)
    }

    /// Binds `volume_id` to position `code`.
    ///
    /// Re-assigning a volume to the position it already occupies succeeds
    /// without writing. A position held by another volume fails with
    /// `PositionOccupied`, and so does losing the claim race.
    #[instrument(skip(self), fields(volume_id = %volume_id, posicao = %code))]
    pub async fn assign(&self, volume_id: Uuid, code: &str) -> Result<Assignment, ServiceError> {
        let position = self.get_position(code).await?;
        let volume = self.registry.get(volume_id).await?;

        match position.volume_id {
            Some(occupant) if occupant != volume_id => {
                counter!("volume_ledger.assign.occupied", 1);
                return Err(ServiceError::PositionOccupied {
                    posicao: code.to_string(),
                    occupant: Some(occupant),
                });
            }
            Some(_) if is_stored_at(&volume, code) => {
                debug!("Volume already bound to this position");
                return Ok(Assignment { position, volume });
            }
            _ => {}
        }

        let store_event = VolumeEvent::Store {
            posicao: code.to_string(),
        };
        if volume.status.apply(volume.tipo, &store_event).is_none() {
            counter!("volume_ledger.assign.rejected", 1);
            return Err(ServiceError::conflict(
                volume_id,
                volume.status,
                VolumeStatus::Stored.as_str(),
            ));
        }

        let claimed = position.is_free() && self.claim(code, volume_id).await?;

        match self.registry.transition(volume_id, store_event).await {
            Ok(volume) => {
                let position = self.get_position(code).await?;
                counter!("volume_ledger.assign.bound", 1);
                info!("Volume stored");
                Ok(Assignment { position, volume })
            }
            Err(err) => {
                if claimed {
                    self.rollback_claim(code, volume_id).await;
                }
                Err(err)
            }
        }
    }

    /// Conditional claim of a free slot. Returns `true` when this call wrote
    /// the binding and `false` when the volume was already bound there.
    async fn claim(&self, code: &str, volume_id: Uuid) -> Result<bool, ServiceError> {
        let expected = fields(json!({ "volume_id": null }));
        let patch = fields(json!({
            "volume_id": volume_id,
            "ocupada": true,
            "updated_at": Utc::now(),
        }));
        match self
            .store
            .update_if(EntityKind::Position, code, &expected, patch)
            .await
        {
            Ok(_) => Ok(true),
            Err(StoreError::PreconditionFailed { .. }) => {
                let current = self.get_position(code).await?;
                if current.volume_id == Some(volume_id) {
                    return Ok(false);
                }
                counter!("volume_ledger.assign.occupied", 1);
                warn!(occupant = ?current.volume_id, "Lost race for position");
                Err(ServiceError::PositionOccupied {
                    posicao: code.to_string(),
                    occupant: current.volume_id,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn rollback_claim(&self, code: &str, volume_id: Uuid) {
        match self.clear(code, volume_id).await {
            Ok(_) => {
                counter!("volume_ledger.assign.rolled_back", 1);
                warn!(posicao = %code, volume_id = %volume_id, "Position claim rolled back");
            }
            Err(err) => {
                error!(
                    posicao = %code,
                    volume_id = %volume_id,
                    error = %err,
                    "Failed to roll back position claim"
                );
            }
        }
    }

    async fn clear(&self, code: &str, occupant: Uuid) -> Result<Position, StoreError> {
        let expected = fields(json!({ "volume_id": occupant }));
        let patch = fields(json!({
            "volume_id": Value::Null,
            "ocupada": false,
            "updated_at": Utc::now(),
        }));
        let record = self
            .store
            .update_if(EntityKind::Position, code, &expected, patch)
            .await?;
        from_record(record)
    }

    /// Empties position `code`; releasing an empty position is a no-op.
    ///
    /// A volume stored at the position goes back to `impressa` before the
    /// slot is cleared. If clearing fails after that, the volume is stored
    /// again.
    #[instrument(skip(self), fields(posicao = %code))]
    pub async fn release(&self, code: &str) -> Result<(), ServiceError> {
        let position = self.get_position(code).await?;
        let Some(occupant) = position.volume_id else {
            debug!("Position already empty");
            return Ok(());
        };

        let mut unstored = false;
        if let Some(volume) = self.registry.find(occupant).await? {
            if is_stored_at(&volume, code) {
                match self.registry.transition(occupant, VolumeEvent::Unstore).await {
                    Ok(_) => unstored = true,
                    Err(ServiceError::Conflict { current, .. }) => {
                        warn!(volume_id = %occupant, %current, "Volume moved while releasing its position");
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        match self.clear(code, occupant).await {
            Ok(_) => {}
            Err(StoreError::PreconditionFailed { .. }) => {
                debug!(volume_id = %occupant, "Position changed during release; nothing to do");
                return Ok(());
            }
            Err(err) => {
                if unstored {
                    self.restore_occupant(code, occupant).await;
                }
                return Err(err.into());
            }
        }
        counter!("volume_ledger.release.cleared", 1);

        info!(volume_id = %occupant, "Position released");
        Ok(())
    }

    async fn restore_occupant(&self, code: &str, volume_id: Uuid) {
        let event = VolumeEvent::Store {
            posicao: code.to_string(),
        };
        match self.registry.transition(volume_id, event).await {
            Ok(_) => {
                counter!("volume_ledger.release.rolled_back", 1);
                warn!(posicao = %code, volume_id = %volume_id, "Release rolled back");
            }
            Err(err) => {
                error!(
                    posicao = %code,
                    volume_id = %volume_id,
                    error = %err,
                    "Failed to roll back release; volume left in impressa behind a bound slot"
                );
            }
        }
    }
}

fn is_stored_at(volume: &Volume, code: &str) -> bool {
    volume.status == VolumeStatus::Stored && volume.posicao.as_deref() == Some(code)
}
