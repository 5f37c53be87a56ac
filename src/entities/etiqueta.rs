use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Volume label row. Enumerations are stored as their lowercase names and
/// ids as text so SQLite and Postgres share one schema.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "etiquetas")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub codigo: String,
    pub tipo: String,
    pub nota_fiscal_id: String,
    pub numero_nf: Option<String>,
    pub chave_nf: Option<String>,
    pub status: String,
    pub tipo_volume: String,
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
    pub etiqueta_mae_id: Option<String>,
    pub posicao: Option<String>,
    pub data_geracao: DateTime<Utc>,
    pub data_impressao: Option<DateTime<Utc>>,
    pub data_inutilizacao: Option<DateTime<Utc>>,
    pub motivo_inutilizacao: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
