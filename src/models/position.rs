use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;
use validator::Validate;

pub const DEFAULT_CAPACITY_CLASS: &str = "padrao";

/// A storage slot. `volume_id` is the single source of truth for occupancy;
/// `ocupada` mirrors it for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub posicao: String,
    pub area: Option<String>,
    pub ocupada: bool,
    pub volume_id: Option<Uuid>,
    pub carregamento_id: Option<String>,
    pub classe_capacidade: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn is_free(&self) -> bool {
        self.volume_id.is_none()
    }

    /// Ordering key so that `E2` sorts before `E10`.
    pub fn sort_key(&self) -> (String, u64, String) {
        natural_key(&self.posicao)
    }
}

pub(crate) fn natural_key(code: &str) -> (String, u64, String) {
    let prefix: String = code.chars().take_while(|c| !c.is_ascii_digit()).collect();
    let digits: String = code[prefix.len()..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let suffix = code[prefix.len() + digits.len()..].to_string();
    (prefix, digits.parse().unwrap_or(0), suffix)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct NewPosition {
    #[validate(length(min = 1, max = 32, message = "posicao must be 1-32 characters"))]
    pub posicao: String,
    #[serde(default)]
    pub area: Option<String>,
    #[serde(default)]
    pub classe_capacidade: Option<String>,
    #[serde(default)]
    pub carregamento_id: Option<String>,
}

impl NewPosition {
    pub fn into_position(self, now: DateTime<Utc>) -> Position {
        Position {
            posicao: self.posicao,
            area: self.area,
            ocupada: false,
            volume_id: None,
            carregamento_id: self.carregamento_id,
            classe_capacidade: self
                .classe_capacidade
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CAPACITY_CLASS.to_string()),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Truck layout columns: left, center, right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum LayoutColumn {
    #[strum(serialize = "E")]
    Left,
    #[strum(serialize = "C")]
    Center,
    #[strum(serialize = "D")]
    Right,
}

impl LayoutColumn {
    pub fn code(&self, row: u32) -> String {
        format!("{self}{row}")
    }
}
