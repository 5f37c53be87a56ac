//! Label rendering and printer sink.
//!
//! The coordinator only sees [`LabelPrinter`]; [`SpoolPrinter`] renders a
//! plain-text artifact and optionally drops it into a spool directory.

use std::{
    fmt::Write as _,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::Volume;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum PrintFormat {
    #[default]
    #[serde(rename = "a4")]
    #[strum(serialize = "a4")]
    A4,
    #[serde(rename = "100x150")]
    #[strum(serialize = "100x150")]
    Label100x150,
    #[serde(rename = "50x100")]
    #[strum(serialize = "50x100")]
    Label50x100,
}

impl PrintFormat {
    pub fn labels_per_page(&self) -> usize {
        match self {
            PrintFormat::A4 => 4,
            PrintFormat::Label100x150 | PrintFormat::Label50x100 => 1,
        }
    }

    fn line_width(&self) -> usize {
        match self {
            PrintFormat::A4 => 48,
            PrintFormat::Label100x150 => 40,
            PrintFormat::Label50x100 => 28,
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LabelLayout {
    #[default]
    Default,
    Compact,
    Enhanced,
}

#[derive(Debug, Clone)]
pub struct PrintJob {
    pub nota_fiscal_id: String,
    pub volumes: Vec<Volume>,
    pub format: PrintFormat,
    pub layout: LabelLayout,
    pub reprint: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintArtifact {
    pub job_id: Uuid,
    pub format: PrintFormat,
    pub layout: LabelLayout,
    pub label_count: usize,
    pub page_count: usize,
    pub content: String,
    pub produced_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum PrintError {
    #[error("printer unavailable: {0}")]
    Unavailable(String),
    #[error("nothing to print")]
    EmptyJob,
    #[error("failed to write spool file: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait LabelPrinter: Send + Sync {
    async fn print(&self, job: &PrintJob) -> Result<PrintArtifact, PrintError>;
}

/// Renders labels to text and keeps every artifact it produced.
#[derive(Debug, Clone, Default)]
pub struct SpoolPrinter {
    spool_dir: Option<PathBuf>,
    artifacts: Arc<Mutex<Vec<PrintArtifact>>>,
}

impl SpoolPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_spool_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            spool_dir: Some(dir.into()),
            ..Self::default()
        }
    }

    pub fn artifacts(&self) -> Vec<PrintArtifact> {
        self.artifacts
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LabelPrinter for SpoolPrinter {
    async fn print(&self, job: &PrintJob) -> Result<PrintArtifact, PrintError> {
        if job.volumes.is_empty() {
            return Err(PrintError::EmptyJob);
        }

        let per_page = job.format.labels_per_page();
        let artifact = PrintArtifact {
            job_id: Uuid::new_v4(),
            format: job.format,
            layout: job.layout,
            label_count: job.volumes.len(),
            page_count: job.volumes.len().div_ceil(per_page),
            content: render(job),
            produced_at: Utc::now(),
        };
        if let Some(dir) = &self.spool_dir {
            tokio::fs::create_dir_all(dir).await?;
            let path = dir.join(format!("{}-{}.txt", job.nota_fiscal_id, artifact.job_id));
            tokio::fs::write(&path, artifact.content.as_bytes()).await?;
            debug!(path = %path.display(), "Label artifact spooled");
        }

        info!(
            job_id = %artifact.job_id,
            labels = artifact.label_count,
            pages = artifact.page_count,
            format = %artifact.format,
            "Labels rendered"
        );
        if let Ok(mut artifacts) = self.artifacts.lock() {
            artifacts.push(artifact.clone());
        }
        Ok(artifact)
    }
}

/// Text rendering of a print job, one block per label.
pub fn render(job: &PrintJob) -> String {
    let width = job.format.line_width();
    let rule = "=".repeat(width);
    let mut content = String::new();

    for (index, volume) in job.volumes.iter().enumerate() {
        if index > 0 && index % job.format.labels_per_page() == 0 {
            content.push_str("\x0c\n");
        }
        let _ = writeln!(content, "{rule}");
        let _ = writeln!(content, "{}", volume.codigo);
        let numero = volume
            .numero_nf
            .as_deref()
            .unwrap_or(volume.nota_fiscal_id.as_str());
        let _ = writeln!(
            content,
            "NF {numero}  VOLUME {}/{}",
            volume.volume_numero, volume.total_volumes
        );

        if job.layout != LabelLayout::Compact {
            if let Some(descricao) = &volume.descricao {
                let _ = writeln!(content, "{}", truncate(descricao, width));
            }
            if let Some(peso) = volume.peso_total_bruto {
                let _ = writeln!(content, "PESO {peso:.2} kg");
            }
        }

        if job.layout == LabelLayout::Enhanced {
            if let Some(cubagem) = volume.cubagem_m3() {
                let _ = writeln!(content, "CUBAGEM {cubagem:.2} m3");
            }
            if let Some(area) = &volume.area {
                let _ = writeln!(content, "AREA {area}");
            }
        }

        if volume.is_chemical() {
            let _ = writeln!(
                content,
                "ONU {}  RISCO {}",
                volume.codigo_onu.as_deref().unwrap_or("-"),
                volume.codigo_risco.as_deref().unwrap_or("-")
            );
        }
        if job.reprint {
            let _ = writeln!(content, "REIMPRESSAO");
        }
    }
    let _ = writeln!(content, "{rule}");
    content
}

fn truncate(text: &str, width: usize) -> String {
    text.chars().take(width).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewVolume, VolumeType};
    use chrono::FixedOffset;

    fn volume(numero: i32, tipo_volume: VolumeType) -> Volume {
        NewVolume {
            nota_fiscal_id: "nf-77".into(),
            numero_nf: Some("77".into()),
            tipo_volume,
            quantidade: 1,
            volume_numero: numero,
            total_volumes: 5,
            codigo_onu: Some("1203".into()),
            codigo_risco: Some("33".into()),
            ..Default::default()
        }
        .into_volume(Utc::now(), FixedOffset::east_opt(0).unwrap())
    }

    fn job(volumes: Vec<Volume>, format: PrintFormat, layout: LabelLayout) -> PrintJob {
        PrintJob {
            nota_fiscal_id: "nf-77".into(),
            volumes,
            format,
            layout,
            reprint: false,
        }
    }

    #[test]
    fn formats_parse_from_their_wire_names() {
        assert_eq!("100x150".parse::<PrintFormat>().unwrap(), PrintFormat::Label100x150);
        assert_eq!("enhanced".parse::<LabelLayout>().unwrap(), LabelLayout::Enhanced);
        assert!("a3".parse::<PrintFormat>().is_err());
    }

    #[test]
    fn chemical_labels_carry_hazard_codes() {
        let text = render(&job(
            vec![volume(1, VolumeType::Chemical)],
            PrintFormat::Label100x150,
            LabelLayout::Default,
        ));
        assert!(text.contains("ONU 1203  RISCO 33"));
        assert!(text.contains("VOLUME 1/5"));
    }

    #[tokio::test]
    async fn a4_packs_four_labels_per_page() {
        let printer = SpoolPrinter::new();
        let volumes = (1..=5).map(|n| volume(n, VolumeType::General)).collect();
        let artifact = printer
            .print(&job(volumes, PrintFormat::A4, LabelLayout::Compact))
            .await
            .unwrap();

        assert_eq!(artifact.label_count, 5);
        assert_eq!(artifact.page_count, 2);
        assert_eq!(printer.artifacts().len(), 1);
    }

    #[tokio::test]
    async fn spool_dir_receives_the_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let printer = SpoolPrinter::with_spool_dir(dir.path());
        let artifact = printer
            .print(&job(
                vec![volume(1, VolumeType::General)],
                PrintFormat::Label50x100,
                LabelLayout::Enhanced,
            ))
            .await
            .unwrap();

        let path = dir.path().join(format!("nf-77-{}.txt", artifact.job_id));
        let written = std::fs::read_to_string(path).unwrap();
        assert_eq!(written, artifact.content);
    }

    #[tokio::test]
    async fn empty_jobs_are_refused() {
        let printer = SpoolPrinter::new();
        let err = printer
            .print(&job(vec![], PrintFormat::A4, LabelLayout::Default))
            .await
            .unwrap_err();
        assert!(matches!(err, PrintError::EmptyJob));
    }
}
