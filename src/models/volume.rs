use std::borrow::Cow;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Lifecycle status of a volume label.
///
/// Persisted values are the lowercase Portuguese names used by the
/// warehouse floor (`gerada`, `impressa`, ...).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
pub enum VolumeStatus {
    #[serde(rename = "gerada")]
    #[strum(serialize = "gerada")]
    Generated,
    #[serde(rename = "impressa")]
    #[strum(serialize = "impressa")]
    Printed,
    #[serde(rename = "expedida")]
    #[strum(serialize = "expedida")]
    Shipped,
    #[serde(rename = "recebida")]
    #[strum(serialize = "recebida")]
    Received,
    #[serde(rename = "armazenada")]
    #[strum(serialize = "armazenada")]
    Stored,
    #[serde(rename = "inutilizada")]
    #[strum(serialize = "inutilizada")]
    Invalidated,
    #[serde(rename = "unitizada")]
    #[strum(serialize = "unitizada")]
    Unitized,
}

impl VolumeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeStatus::Generated => "gerada",
            VolumeStatus::Printed => "impressa",
            VolumeStatus::Shipped => "expedida",
            VolumeStatus::Received => "recebida",
            VolumeStatus::Stored => "armazenada",
            VolumeStatus::Invalidated => "inutilizada",
            VolumeStatus::Unitized => "unitizada",
        }
    }

    /// Terminal states accept no further events.
    pub fn is_terminal(&self) -> bool {
        matches!(self, VolumeStatus::Invalidated | VolumeStatus::Unitized)
    }

    /// Returns the state reached by applying `event` to a label of `kind`
    /// currently in this state, or `None` when the transition is not allowed.
    pub fn apply(&self, kind: LabelKind, event: &VolumeEvent) -> Option<VolumeStatus> {
        use VolumeStatus::*;

        if self.is_terminal() {
            return None;
        }

        match (kind, event, *self) {
            (_, VolumeEvent::Invalidate { .. }, _) => Some(Invalidated),
            (_, VolumeEvent::Print, Generated) => Some(Printed),
            (_, VolumeEvent::Reprint, Printed) => Some(Printed),
            (LabelKind::Mother, VolumeEvent::Unitize, Generated | Printed) => Some(Unitized),
            (LabelKind::Volume, VolumeEvent::Store { .. }, Printed | Received) => Some(Stored),
            (LabelKind::Volume, VolumeEvent::Unstore, Stored) => Some(Printed),
            (LabelKind::Volume, VolumeEvent::Ship, Printed | Stored) => Some(Shipped),
            (LabelKind::Volume, VolumeEvent::Receive, Shipped) => Some(Received),
            _ => None,
        }
    }
}

/// Event applied to a volume through the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum VolumeEvent {
    Print,
    Reprint,
    Store { posicao: String },
    Unstore,
    Ship,
    Receive,
    Invalidate { reason: String },
    Unitize,
}

impl VolumeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            VolumeEvent::Print => "print",
            VolumeEvent::Reprint => "reprint",
            VolumeEvent::Store { .. } => "store",
            VolumeEvent::Unstore => "unstore",
            VolumeEvent::Ship => "ship",
            VolumeEvent::Receive => "receive",
            VolumeEvent::Invalidate { .. } => "invalidate",
            VolumeEvent::Unitize => "unitize",
        }
    }

    /// State the event aims for, used when reporting a refused transition.
    pub fn target(&self) -> VolumeStatus {
        match self {
            VolumeEvent::Print | VolumeEvent::Reprint | VolumeEvent::Unstore => {
                VolumeStatus::Printed
            }
            VolumeEvent::Store { .. } => VolumeStatus::Stored,
            VolumeEvent::Ship => VolumeStatus::Shipped,
            VolumeEvent::Receive => VolumeStatus::Received,
            VolumeEvent::Invalidate { .. } => VolumeStatus::Invalidated,
            VolumeEvent::Unitize => VolumeStatus::Unitized,
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum LabelKind {
    #[default]
    #[serde(rename = "volume")]
    #[strum(serialize = "volume")]
    Volume,
    /// Aggregate label standing for a set of unitized volumes.
    #[serde(rename = "mae")]
    #[strum(serialize = "mae")]
    Mother,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum VolumeType {
    #[default]
    #[serde(rename = "geral")]
    #[strum(serialize = "geral")]
    General,
    #[serde(rename = "quimico")]
    #[strum(serialize = "quimico")]
    Chemical,
}

/// A labeled volume as persisted by the resource store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub id: Uuid,
    pub codigo: String,
    pub tipo: LabelKind,
    pub nota_fiscal_id: String,
    pub numero_nf: Option<String>,
    pub chave_nf: Option<String>,
    pub status: VolumeStatus,
    pub tipo_volume: VolumeType,
    pub area: Option<String>,
    pub descricao: Option<String>,
    pub quantidade: i32,
    pub volume_numero: i32,
    pub total_volumes: i32,
    pub altura_cm: Option<f64>,
    pub largura_cm: Option<f64>,
    pub comprimento_cm: Option<f64>,
    pub peso_total_bruto: Option<f64>,
    pub codigo_onu: Option<String>,
    pub codigo_risco: Option<String>,
    pub classificacao_quimica: Option<String>,
    pub etiqueta_mae_id: Option<Uuid>,
    pub posicao: Option<String>,
    pub data_geracao: DateTime<Utc>,
    pub data_impressao: Option<DateTime<Utc>>,
    pub data_inutilizacao: Option<DateTime<Utc>>,
    pub motivo_inutilizacao: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Volume {
    /// Cubic meters from the centimeter dimensions, rounded to two decimals.
    pub fn cubagem_m3(&self) -> Option<f64> {
        match (self.altura_cm, self.largura_cm, self.comprimento_cm) {
            (Some(h), Some(w), Some(l)) => Some(round2(h * w * l / 1_000_000.0)),
            _ => None,
        }
    }

    pub fn is_chemical(&self) -> bool {
        self.tipo_volume == VolumeType::Chemical
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Candidate volume submitted for creation or upsert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_new_volume", skip_on_field_errors = false))]
pub struct NewVolume {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub codigo: Option<String>,
    #[validate(length(min = 1, message = "nota_fiscal_id is required"))]
    pub nota_fiscal_id: String,
    #[serde(default)]
    pub numero_nf: Option<String>,
    #[serde(default)]
    pub chave_nf: Option<String>,
    #[serde(default)]
    pub tipo_volume: VolumeType,
    #[serde(default)]
    pub area: Option<String>,
    #[serde(default)]
    pub descricao: Option<String>,
    #[serde(default = "default_quantidade")]
    #[validate(range(min = 1, message = "quantidade must be greater than zero"))]
    pub quantidade: i32,
    #[validate(range(min = 1, message = "volume_numero must be at least 1"))]
    pub volume_numero: i32,
    #[validate(range(min = 1, message = "total_volumes must be at least 1"))]
    pub total_volumes: i32,
    #[serde(default)]
    pub altura_cm: Option<f64>,
    #[serde(default)]
    pub largura_cm: Option<f64>,
    #[serde(default)]
    pub comprimento_cm: Option<f64>,
    #[serde(default)]
    pub peso_total_bruto: Option<f64>,
    #[serde(default)]
    pub codigo_onu: Option<String>,
    #[serde(default)]
    pub codigo_risco: Option<String>,
    #[serde(default)]
    pub classificacao_quimica: Option<String>,
}

fn default_quantidade() -> i32 {
    1
}

fn validate_new_volume(candidate: &NewVolume) -> Result<(), ValidationError> {
    if candidate.volume_numero > candidate.total_volumes {
        return Err(validation_error(
            "volume_numero",
            format!(
                "volume_numero {} exceeds total_volumes {}",
                candidate.volume_numero, candidate.total_volumes
            ),
        ));
    }

    let dimensions = [
        ("altura_cm", candidate.altura_cm),
        ("largura_cm", candidate.largura_cm),
        ("comprimento_cm", candidate.comprimento_cm),
        ("peso_total_bruto", candidate.peso_total_bruto),
    ];
    for (field, value) in dimensions {
        if matches!(value, Some(v) if v < 0.0 || !v.is_finite()) {
            return Err(validation_error(
                "negative_measure",
                format!("{field} must be a non-negative number"),
            ));
        }
    }

    check_hazard_fields(
        candidate.tipo_volume,
        candidate.codigo_onu.as_deref(),
        candidate.codigo_risco.as_deref(),
    )
}

/// Chemical volumes must carry both an ONU code and a risk code.
pub fn check_hazard_fields(
    tipo_volume: VolumeType,
    codigo_onu: Option<&str>,
    codigo_risco: Option<&str>,
) -> Result<(), ValidationError> {
    if tipo_volume != VolumeType::Chemical {
        return Ok(());
    }
    if is_blank(codigo_onu) {
        return Err(validation_error(
            "codigo_onu",
            "codigo_onu is required for chemical volumes",
        ));
    }
    if is_blank(codigo_risco) {
        return Err(validation_error(
            "codigo_risco",
            "codigo_risco is required for chemical volumes",
        ));
    }
    Ok(())
}

pub(crate) fn is_blank(value: Option<&str>) -> bool {
    value.map(|v| v.trim().is_empty()).unwrap_or(true)
}

fn validation_error(code: &'static str, message: impl Into<Cow<'static, str>>) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(message.into());
    error
}

impl NewVolume {
    /// Document number used in label codes, falling back to a prefix of the
    /// document id when the number is unknown.
    pub fn document_number(&self) -> String {
        match self.numero_nf.as_deref().map(str::trim) {
            Some(numero) if !numero.is_empty() => numero.to_string(),
            _ => self.nota_fiscal_id.chars().take(8).collect(),
        }
    }

    /// Materializes the candidate as a freshly generated volume.
    pub fn into_volume(self, now: DateTime<Utc>, label_offset: FixedOffset) -> Volume {
        let numero = self.document_number();
        let codigo = match self.codigo {
            Some(code) if VolumeCode::is_well_formed(&code, &numero) => code,
            _ => VolumeCode::generate(&numero, self.volume_numero, now, label_offset),
        };
        let descricao = self
            .descricao
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| format!("Volume {}/{}", self.volume_numero, self.total_volumes));
        let (codigo_onu, codigo_risco, classificacao_quimica) = match self.tipo_volume {
            VolumeType::Chemical => (
                self.codigo_onu,
                self.codigo_risco,
                self.classificacao_quimica,
            ),
            VolumeType::General => (None, None, None),
        };

        Volume {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            codigo,
            tipo: LabelKind::Volume,
            nota_fiscal_id: self.nota_fiscal_id,
            numero_nf: self.numero_nf,
            chave_nf: self.chave_nf,
            status: VolumeStatus::Generated,
            tipo_volume: self.tipo_volume,
            area: self.area,
            descricao: Some(descricao),
            quantidade: self.quantidade,
            volume_numero: self.volume_numero,
            total_volumes: self.total_volumes,
            altura_cm: self.altura_cm,
            largura_cm: self.largura_cm,
            comprimento_cm: self.comprimento_cm,
            peso_total_bruto: self.peso_total_bruto,
            codigo_onu,
            codigo_risco,
            classificacao_quimica,
            etiqueta_mae_id: None,
            posicao: None,
            data_geracao: now,
            data_impressao: None,
            data_inutilizacao: None,
            motivo_inutilizacao: None,
            updated_at: now,
        }
    }
}

/// Request for an aggregate (mother) label over a document's volumes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct NewMotherLabel {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub codigo: Option<String>,
    #[validate(length(min = 1, message = "nota_fiscal_id is required"))]
    pub nota_fiscal_id: String,
    #[serde(default)]
    pub numero_nf: Option<String>,
    #[serde(default)]
    pub descricao: Option<String>,
    #[serde(default)]
    pub area: Option<String>,
}

impl NewMotherLabel {
    pub fn into_volume(self, now: DateTime<Utc>, label_offset: FixedOffset) -> Volume {
        let numero = match self.numero_nf.as_deref().map(str::trim) {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => self.nota_fiscal_id.chars().take(8).collect(),
        };
        let codigo = self
            .codigo
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| VolumeCode::mother(&numero, now, label_offset));

        Volume {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            codigo,
            tipo: LabelKind::Mother,
            nota_fiscal_id: self.nota_fiscal_id,
            numero_nf: self.numero_nf,
            chave_nf: None,
            status: VolumeStatus::Generated,
            tipo_volume: VolumeType::General,
            area: self.area,
            descricao: self.descricao.or_else(|| Some(format!("Unitizacao NF {numero}"))),
            quantidade: 1,
            volume_numero: 1,
            total_volumes: 1,
            altura_cm: None,
            largura_cm: None,
            comprimento_cm: None,
            peso_total_bruto: None,
            codigo_onu: None,
            codigo_risco: None,
            classificacao_quimica: None,
            etiqueta_mae_id: None,
            posicao: None,
            data_geracao: now,
            data_impressao: None,
            data_inutilizacao: None,
            motivo_inutilizacao: None,
            updated_at: now,
        }
    }
}

/// Label code generation: `NF{numero}-{volume:03}-{ddMMyyyy}-{HHmm}`.
pub struct VolumeCode;

impl VolumeCode {
    pub fn generate(
        numero_nf: &str,
        volume_numero: i32,
        at: DateTime<Utc>,
        offset: FixedOffset,
    ) -> String {
        let local = at.with_timezone(&offset);
        format!(
            "NF{}-{:03}-{}",
            numero_nf,
            volume_numero,
            local.format("%d%m%Y-%H%M")
        )
    }

    pub fn mother(numero_nf: &str, at: DateTime<Utc>, offset: FixedOffset) -> String {
        let local = at.with_timezone(&offset);
        format!("NF{}-MAE-{}", numero_nf, local.format("%d%m%Y-%H%M"))
    }

    /// A caller-supplied code is kept when it already follows the
    /// `NF{numero}-NNN-ddMMyyyy-HHmm` shape for the same document.
    pub fn is_well_formed(code: &str, numero_nf: &str) -> bool {
        let Some(rest) = code.strip_prefix(&format!("NF{numero_nf}-")) else {
            return false;
        };
        let parts: Vec<&str> = rest.split('-').collect();
        matches!(
            parts.as_slice(),
            [seq, date, time]
                if seq.len() == 3
                    && date.len() == 8
                    && time.len() == 4
                    && [seq, date, time]
                        .iter()
                        .all(|p| p.chars().all(|c| c.is_ascii_digit()))
        )
    }
}
