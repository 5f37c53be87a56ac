//! Label Print Coordinator
//!
//! Runs the two-phase print flow for a document's volumes: warn when labels
//! already exist, then persist every sibling, print, and mark what was saved.
//! Writes are not transactional across volumes; failures are collected and
//! reported per volume instead of being rolled back.

use std::{collections::HashSet, sync::Arc};

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::errors::{PartialCommitReport, ServiceError};
use crate::models::{NewVolume, Volume, VolumeEvent, VolumeStatus};
use crate::services::label_printer::{
    LabelLayout, LabelPrinter, PrintArtifact, PrintFormat, PrintJob,
};
use crate::services::volume_registry::VolumeRegistry;

/// A print request over one target volume and all of its siblings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintBatch {
    pub nota_fiscal_id: String,
    pub target: NewVolume,
    /// Every volume of the document, target included, in print order.
    pub siblings: Vec<NewVolume>,
    pub format: PrintFormat,
    pub layout: LabelLayout,
}

impl PrintBatch {
    /// Assigns ids to candidates lacking one and makes sure the target is
    /// part of the sibling set.
    pub fn new(
        mut target: NewVolume,
        siblings: Vec<NewVolume>,
        format: PrintFormat,
        layout: LabelLayout,
    ) -> Result<Self, ServiceError> {
        if target.nota_fiscal_id.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "nota_fiscal_id is required".to_string(),
            ));
        }
        let target_id = *target.id.get_or_insert_with(Uuid::new_v4);

        let mut seen = HashSet::new();
        let mut all = Vec::with_capacity(siblings.len() + 1);
        for mut sibling in siblings {
            if sibling.nota_fiscal_id != target.nota_fiscal_id {
                return Err(ServiceError::ValidationError(format!(
                    "Volume {} belongs to document {}, not {}",
                    sibling.volume_numero, sibling.nota_fiscal_id, target.nota_fiscal_id
                )));
            }
            let is_target = sibling.id == Some(target_id)
                || (sibling.id.is_none() && sibling.volume_numero == target.volume_numero);
            if is_target {
                sibling = target.clone();
            }
            let id = *sibling.id.get_or_insert_with(Uuid::new_v4);
            if seen.insert(id) {
                all.push(sibling);
            }
        }
        if !seen.contains(&target_id) {
            all.push(target.clone());
        }

        Ok(Self {
            nota_fiscal_id: target.nota_fiscal_id.clone(),
            target,
            siblings: all,
            format,
            layout,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PrintOutcome {
    /// Labels already exist for the document; nothing was written.
    NeedsConfirmation {
        existing_count: usize,
        pending: PrintBatch,
    },
    Printed {
        updated_volumes: Vec<Volume>,
        artifact: PrintArtifact,
    },
}

#[derive(Clone)]
pub struct LabelPrintCoordinator {
    registry: Arc<VolumeRegistry>,
    printer: Arc<dyn LabelPrinter>,
}

impl LabelPrintCoordinator {
    pub fn new(registry: Arc<VolumeRegistry>, printer: Arc<dyn LabelPrinter>) -> Self {
        Self { registry, printer }
    }

    /// First phase: asks for confirmation when the document already has
    /// live volume labels, otherwise commits and prints right away.
    #[instrument(skip(self, volume, siblings), fields(nota_fiscal_id = %volume.nota_fiscal_id))]
    pub async fn request_print(
        &self,
        volume: NewVolume,
        siblings: Vec<NewVolume>,
        format: PrintFormat,
        layout: LabelLayout,
    ) -> Result<PrintOutcome, ServiceError> {
        let batch = PrintBatch::new(volume, siblings, format, layout)?;

        let existing = self
            .registry
            .active_for_document(&batch.nota_fiscal_id)
            .await?;
        if !existing.is_empty() {
            counter!("volume_ledger.print.confirmation_required", 1);
            info!(
                existing_count = existing.len(),
                "Volumes already registered for document; confirmation required"
            );
            return Ok(PrintOutcome::NeedsConfirmation {
                existing_count: existing.len(),
                pending: batch,
            });
        }

        self.commit(batch).await
    }

    /// Second phase: commits a batch previously returned for confirmation.
    #[instrument(skip(self, pending), fields(nota_fiscal_id = %pending.nota_fiscal_id))]
    pub async fn confirm_and_print(
        &self,
        mut pending: PrintBatch,
        format: PrintFormat,
        layout: LabelLayout,
    ) -> Result<PrintOutcome, ServiceError> {
        pending.format = format;
        pending.layout = layout;
        self.commit(pending).await
    }

    async fn commit(&self, batch: PrintBatch) -> Result<PrintOutcome, ServiceError> {
        let mut failed = Vec::new();
        let mut saved = Vec::with_capacity(batch.siblings.len());
        let mut first_error = None;

        for candidate in batch.siblings {
            let candidate_id = candidate.id.unwrap_or_default();
            match self.registry.save(candidate).await {
                Ok(volume) => saved.push(volume),
                Err(err) => {
                    warn!(volume_id = %candidate_id, error = %err, "Failed to save volume");
                    failed.push(candidate_id);
                    first_error.get_or_insert(err);
                }
            }
        }

        if saved.is_empty() {
            counter!("volume_ledger.print.failed", 1);
            return Err(first_error.unwrap_or_else(|| {
                ServiceError::ValidationError("No volumes to print".to_string())
            }));
        }

        let artifact = self
            .print(&batch.nota_fiscal_id, saved.clone(), batch.format, batch.layout, false)
            .await?;

        let mut updated = Vec::with_capacity(saved.len());
        for volume in saved {
            let event = if volume.status == VolumeStatus::Printed {
                VolumeEvent::Reprint
            } else {
                VolumeEvent::Print
            };
            match self.registry.transition(volume.id, event).await {
                Ok(volume) => updated.push(volume),
                Err(err) => {
                    warn!(volume_id = %volume.id, error = %err, "Failed to mark volume as printed");
                    failed.push(volume.id);
                }
            }
        }

        if !failed.is_empty() {
            counter!("volume_ledger.print.partial", 1);
            let report = PartialCommitReport {
                succeeded: updated.iter().map(|v| v.id).collect(),
                failed,
            };
            warn!(failed = ?report.failed, "Print committed partially");
            return Err(ServiceError::PartialCommit(report));
        }

        counter!("volume_ledger.print.completed", 1);
        info!(volumes = updated.len(), job_id = %artifact.job_id, "Labels printed");
        Ok(PrintOutcome::Printed {
            updated_volumes: updated,
            artifact,
        })
    }

    /// Prints again volumes that are already `impressa`, refreshing their
    /// print timestamp. No existence warning is raised.
    #[instrument(skip(self, sibling_ids), fields(volume_id = %volume_id))]
    pub async fn reprint(
        &self,
        volume_id: Uuid,
        sibling_ids: &[Uuid],
        format: PrintFormat,
        layout: LabelLayout,
    ) -> Result<(), ServiceError> {
        let target = self.registry.get(volume_id).await?;

        let mut ids = Vec::with_capacity(sibling_ids.len() + 1);
        for id in std::iter::once(&volume_id).chain(sibling_ids) {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }

        let mut volumes = Vec::with_capacity(ids.len());
        for id in ids {
            let volume = if id == volume_id {
                target.clone()
            } else {
                self.registry.get(id).await?
            };
            if volume.nota_fiscal_id != target.nota_fiscal_id {
                return Err(ServiceError::ValidationError(format!(
                    "Volume {id} belongs to another document"
                )));
            }
            if volume.status != VolumeStatus::Printed {
                return Err(ServiceError::conflict(
                    id,
                    volume.status,
                    VolumeStatus::Printed.as_str(),
                ));
            }
            volumes.push(volume);
        }

        self.print(&target.nota_fiscal_id, volumes.clone(), format, layout, true)
            .await?;

        let mut report = PartialCommitReport::default();
        for volume in volumes {
            match self.registry.transition(volume.id, VolumeEvent::Reprint).await {
                Ok(_) => report.succeeded.push(volume.id),
                Err(err) => {
                    warn!(volume_id = %volume.id, error = %err, "Failed to refresh print timestamp");
                    report.failed.push(volume.id);
                }
            }
        }
        if !report.failed.is_empty() {
            counter!("volume_ledger.print.partial", 1);
            return Err(ServiceError::PartialCommit(report));
        }

        counter!("volume_ledger.print.reprinted", 1);
        info!(volumes = report.succeeded.len(), "Labels reprinted");
        Ok(())
    }

    async fn print(
        &self,
        nota_fiscal_id: &str,
        volumes: Vec<Volume>,
        format: PrintFormat,
        layout: LabelLayout,
        reprint: bool,
    ) -> Result<PrintArtifact, ServiceError> {
        let job = PrintJob {
            nota_fiscal_id: nota_fiscal_id.to_string(),
            volumes,
            format,
            layout,
            reprint,
        };
        self.printer.print(&job).await.map_err(|err| {
            counter!("volume_ledger.print.failed", 1);
            warn!(error = %err, "Printer rejected job");
            ServiceError::PrintFailed(err.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::label_printer::PrintError;
    use crate::store::InMemoryStore;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use mockall::mock;

    mock! {
        Printer {}

        #[async_trait]
        impl LabelPrinter for Printer {
            async fn print(&self, job: &PrintJob) -> Result<PrintArtifact, PrintError>;
        }
    }

    fn candidate(numero: i32) -> NewVolume {
        NewVolume {
            nota_fiscal_id: "nf-500".into(),
            numero_nf: Some("500".into()),
            quantidade: 1,
            volume_numero: numero,
            total_volumes: 2,
            ..Default::default()
        }
    }

    fn registry() -> Arc<VolumeRegistry> {
        Arc::new(VolumeRegistry::new(Arc::new(InMemoryStore::new())))
    }

    #[test]
    fn batch_includes_target_once() {
        let target = candidate(1);
        let batch = PrintBatch::new(
            target,
            vec![candidate(1), candidate(2)],
            PrintFormat::A4,
            LabelLayout::Default,
        )
        .unwrap();

        assert_eq!(batch.siblings.len(), 2);
        assert_eq!(batch.siblings[0].id, batch.target.id);
        assert!(batch.siblings.iter().all(|s| s.id.is_some()));
    }

    #[test]
    fn batch_rejects_siblings_from_other_documents() {
        let mut stranger = candidate(2);
        stranger.nota_fiscal_id = "nf-999".into();
        let err = PrintBatch::new(candidate(1), vec![stranger], PrintFormat::A4, LabelLayout::Default)
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));
    }

    #[tokio::test]
    async fn printer_failure_leaves_volumes_unprinted() {
        let registry = registry();
        let mut printer = MockPrinter::new();
        printer
            .expect_print()
            .times(1)
            .returning(|_| Err(PrintError::Unavailable("offline".into())));
        let coordinator = LabelPrintCoordinator::new(registry.clone(), Arc::new(printer));

        let err = coordinator
            .request_print(
                candidate(1),
                vec![candidate(2)],
                PrintFormat::Label100x150,
                LabelLayout::Default,
            )
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::PrintFailed(_));

        let volumes = registry.list_by_document("nf-500").await.unwrap();
        assert_eq!(volumes.len(), 2);
        assert!(volumes.iter().all(|v| v.status == VolumeStatus::Generated));
    }

    #[tokio::test]
    async fn printer_receives_every_saved_sibling() {
        let registry = registry();
        let mut printer = MockPrinter::new();
        printer
            .expect_print()
            .withf(|job| job.volumes.len() == 2 && !job.reprint && job.layout == LabelLayout::Compact)
            .times(1)
            .returning(|job| {
                Ok(PrintArtifact {
                    job_id: Uuid::new_v4(),
                    format: job.format,
                    layout: job.layout,
                    label_count: job.volumes.len(),
                    page_count: 1,
                    content: String::new(),
                    produced_at: chrono::Utc::now(),
                })
            });
        let coordinator = LabelPrintCoordinator::new(registry, Arc::new(printer));

        let outcome = coordinator
            .request_print(
                candidate(1),
                vec![candidate(2)],
                PrintFormat::A4,
                LabelLayout::Compact,
            )
            .await
            .unwrap();
        assert_matches!(outcome, PrintOutcome::Printed { updated_volumes, .. } => {
            assert_eq!(updated_volumes.len(), 2);
            assert!(updated_volumes.iter().all(|v| v.status == VolumeStatus::Printed));
        });
    }
}
