//! Generic keyed record store.
//!
//! Services talk to persistence only through [`ResourceStore`]. Records are
//! JSON objects keyed by the entity's key field (`id` for volumes, `posicao`
//! for positions). [`ResourceStore::update_if`] is the conditional write the
//! allocator and registry rely on for compare-and-swap semantics.

use std::fmt;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub mod memory;
pub mod sql;

pub use memory::InMemoryStore;
pub use sql::SeaOrmStore;

pub type Record = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Volume,
    Position,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Volume => "volume",
            EntityKind::Position => "position",
        }
    }

    pub fn key_field(&self) -> &'static str {
        match self {
            EntityKind::Volume => "id",
            EntityKind::Position => "posicao",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(String, Value),
    Ne(String, Value),
    IsNull(String),
    NotNull(String),
}

impl Predicate {
    pub fn matches(&self, record: &Record) -> bool {
        let field_value = |field: &str| record.get(field).unwrap_or(&Value::Null);
        match self {
            Predicate::Eq(field, value) => field_value(field) == value,
            Predicate::Ne(field, value) => field_value(field) != value,
            Predicate::IsNull(field) => field_value(field).is_null(),
            Predicate::NotNull(field) => !field_value(field).is_null(),
        }
    }
}

/// Conjunction of field predicates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.predicates.push(Predicate::Eq(field.into(), value.into()));
        self
    }

    pub fn ne(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.predicates.push(Predicate::Ne(field.into(), value.into()));
        self
    }

    pub fn is_null(mut self, field: impl Into<String>) -> Self {
        self.predicates.push(Predicate::IsNull(field.into()));
        self
    }

    pub fn not_null(mut self, field: impl Into<String>) -> Self {
        self.predicates.push(Predicate::NotNull(field.into()));
        self
    }

    /// Equality on every expected field; a JSON null expects the field to be null.
    pub fn from_expected(expected: &Record) -> Self {
        expected
            .iter()
            .fold(Filter::new(), |filter, (field, value)| {
                if value.is_null() {
                    filter.is_null(field.clone())
                } else {
                    filter.eq(field.clone(), value.clone())
                }
            })
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.predicates.iter().all(|p| p.matches(record))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("resource store unavailable: {0}")]
    Unavailable(String),
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: String },
    #[error("{kind} {id} already exists")]
    Duplicate { kind: EntityKind, id: String },
    #[error("precondition failed for {kind} {id}")]
    PreconditionFailed { kind: EntityKind, id: String },
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn find(&self, kind: EntityKind, filter: &Filter) -> Result<Vec<Record>, StoreError>;

    async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Record>, StoreError> {
        let filter = Filter::new().eq(kind.key_field(), id);
        Ok(self.find(kind, &filter).await?.into_iter().next())
    }

    /// Fails with [`StoreError::Duplicate`] when the key is taken.
    async fn insert(&self, kind: EntityKind, record: Record) -> Result<Record, StoreError>;

    async fn update(&self, kind: EntityKind, id: &str, patch: Record)
        -> Result<Record, StoreError>;

    /// Applies `patch` only when every field in `expected` still holds its
    /// expected value. A lost race surfaces as [`StoreError::PreconditionFailed`].
    async fn update_if(
        &self,
        kind: EntityKind,
        id: &str,
        expected: &Record,
        patch: Record,
    ) -> Result<Record, StoreError>;

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

pub fn to_record<T: Serialize>(value: &T) -> Result<Record, StoreError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(StoreError::InvalidRecord(format!(
            "expected an object, got {other}"
        ))),
        Err(e) => Err(StoreError::InvalidRecord(e.to_string())),
    }
}

pub fn from_record<T: DeserializeOwned>(record: Record) -> Result<T, StoreError> {
    serde_json::from_value(Value::Object(record))
        .map_err(|e| StoreError::InvalidRecord(e.to_string()))
}

/// Builds a record from a `json!` object literal; non-objects yield an empty record.
pub fn fields(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

pub(crate) fn key_of(kind: EntityKind, record: &Record) -> Result<String, StoreError> {
    record
        .get(kind.key_field())
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            StoreError::InvalidRecord(format!(
                "{kind} record is missing key field `{}`",
                kind.key_field()
            ))
        })
}
