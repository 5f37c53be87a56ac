use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "posicoes")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub posicao: String,
    pub area: Option<String>,
    pub ocupada: bool,
    pub volume_id: Option<String>,
    pub carregamento_id: Option<String>,
    pub classe_capacidade: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
