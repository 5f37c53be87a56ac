use std::{str::FromStr, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ColumnType, Condition, DatabaseConnection,
    DbErr, EntityTrait, IntoActiveModel, QueryFilter, SqlErr, Value as DbValue,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    from_record, key_of, to_record, EntityKind, Filter, Predicate, Record, ResourceStore,
    StoreError,
};
use crate::entities::{etiqueta, posicao};

/// [`ResourceStore`] over a sea-orm connection (SQLite or Postgres).
///
/// Conditional updates are a single `UPDATE ... WHERE key = ? AND <expected>`;
/// zero affected rows on an existing key means the precondition failed.
#[derive(Debug, Clone)]
pub struct SeaOrmStore {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl ResourceStore for SeaOrmStore {
    async fn find(&self, kind: EntityKind, filter: &Filter) -> Result<Vec<Record>, StoreError> {
        match kind {
            EntityKind::Volume => find_rows::<etiqueta::Entity>(&self.db, filter).await,
            EntityKind::Position => find_rows::<posicao::Entity>(&self.db, filter).await,
        }
    }

    async fn insert(&self, kind: EntityKind, record: Record) -> Result<Record, StoreError> {
        match kind {
            EntityKind::Volume => {
                insert_row::<etiqueta::Entity, etiqueta::ActiveModel>(&self.db, kind, record).await
            }
            EntityKind::Position => {
                insert_row::<posicao::Entity, posicao::ActiveModel>(&self.db, kind, record).await
            }
        }
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: &str,
        patch: Record,
    ) -> Result<Record, StoreError> {
        match kind {
            EntityKind::Volume => {
                update_row::<etiqueta::Entity>(&self.db, kind, id, None, patch).await
            }
            EntityKind::Position => {
                update_row::<posicao::Entity>(&self.db, kind, id, None, patch).await
            }
        }
    }

    async fn update_if(
        &self,
        kind: EntityKind,
        id: &str,
        expected: &Record,
        patch: Record,
    ) -> Result<Record, StoreError> {
        match kind {
            EntityKind::Volume => {
                update_row::<etiqueta::Entity>(&self.db, kind, id, Some(expected), patch).await
            }
            EntityKind::Position => {
                update_row::<posicao::Entity>(&self.db, kind, id, Some(expected), patch).await
            }
        }
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), StoreError> {
        let rows = match kind {
            EntityKind::Volume => delete_row::<etiqueta::Entity>(&self.db, kind, id).await?,
            EntityKind::Position => delete_row::<posicao::Entity>(&self.db, kind, id).await?,
        };
        if rows == 0 {
            return Err(StoreError::NotFound {
                kind,
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.db.ping().await.map_err(map_db_err)
    }
}

async fn find_rows<E>(db: &DatabaseConnection, filter: &Filter) -> Result<Vec<Record>, StoreError>
where
    E: EntityTrait,
    E::Model: Serialize,
{
    let condition = condition_for::<E>(filter)?;
    let rows = E::find()
        .filter(condition)
        .all(db)
        .await
        .map_err(map_db_err)?;
    rows.iter().map(to_record).collect()
}

async fn find_one<E>(
    db: &DatabaseConnection,
    kind: EntityKind,
    id: &str,
) -> Result<Option<Record>, StoreError>
where
    E: EntityTrait,
    E::Model: Serialize,
{
    let key = column_for::<E>(kind.key_field())?;
    E::find()
        .filter(key.eq(id.to_string()))
        .one(db)
        .await
        .map_err(map_db_err)?
        .as_ref()
        .map(to_record)
        .transpose()
}

async fn insert_row<E, A>(
    db: &DatabaseConnection,
    kind: EntityKind,
    record: Record,
) -> Result<Record, StoreError>
where
    E: EntityTrait,
    E::Model: Serialize + DeserializeOwned + IntoActiveModel<A>,
    A: ActiveModelTrait<Entity = E> + Send,
{
    let id = key_of(kind, &record)?;
    let model: E::Model = from_record(record)?;
    E::insert(model.clone().into_active_model())
        .exec_without_returning(db)
        .await
        .map_err(|err| match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => StoreError::Duplicate {
                kind,
                id: id.clone(),
            },
            _ => map_db_err(err),
        })?;
    debug!(%kind, %id, "row inserted");
    to_record(&model)
}

async fn update_row<E>(
    db: &DatabaseConnection,
    kind: EntityKind,
    id: &str,
    expected: Option<&Record>,
    patch: Record,
) -> Result<Record, StoreError>
where
    E: EntityTrait,
    E::Model: Serialize,
{
    let key = column_for::<E>(kind.key_field())?;
    let mut condition = Condition::all().add(key.eq(id.to_string()));
    if let Some(expected) = expected {
        condition = condition.add(condition_for::<E>(&Filter::from_expected(expected))?);
    }

    let mut assignments = Vec::new();
    for (field, value) in &patch {
        if field == kind.key_field() {
            continue;
        }
        let column = column_for::<E>(field)?;
        let value = to_db_value(column.def().get_column_type(), value)?;
        assignments.push((column, value));
    }

    let rows_affected = if assignments.is_empty() {
        // nothing to write; the precondition still has to hold
        E::find()
            .filter(condition)
            .one(db)
            .await
            .map_err(map_db_err)?
            .map_or(0, |_| 1)
    } else {
        let mut update = E::update_many();
        for (column, value) in assignments {
            update = update.col_expr(column, Expr::value(value));
        }
        update
            .filter(condition)
            .exec(db)
            .await
            .map_err(|err| match err.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => StoreError::Duplicate {
                    kind,
                    id: id.to_string(),
                },
                _ => map_db_err(err),
            })?
            .rows_affected
    };

    let current = find_one::<E>(db, kind, id).await?;
    match (rows_affected, current) {
        (_, None) => Err(StoreError::NotFound {
            kind,
            id: id.to_string(),
        }),
        (0, Some(_)) => Err(StoreError::PreconditionFailed {
            kind,
            id: id.to_string(),
        }),
        (_, Some(record)) => Ok(record),
    }
}

async fn delete_row<E>(db: &DatabaseConnection, kind: EntityKind, id: &str) -> Result<u64, StoreError>
where
    E: EntityTrait,
{
    let key = column_for::<E>(kind.key_field())?;
    let result = E::delete_many()
        .filter(key.eq(id.to_string()))
        .exec(db)
        .await
        .map_err(map_db_err)?;
    Ok(result.rows_affected)
}

fn column_for<E: EntityTrait>(field: &str) -> Result<E::Column, StoreError> {
    E::Column::from_str(field)
        .map_err(|_| StoreError::InvalidRecord(format!("unknown field `{field}`")))
}

fn condition_for<E: EntityTrait>(filter: &Filter) -> Result<Condition, StoreError> {
    let mut condition = Condition::all();
    for predicate in filter.predicates() {
        condition = match predicate {
            Predicate::Eq(field, value) if value.is_null() => {
                condition.add(column_for::<E>(field)?.is_null())
            }
            Predicate::Eq(field, value) => {
                let column = column_for::<E>(field)?;
                let value = to_db_value(column.def().get_column_type(), value)?;
                condition.add(column.eq(value))
            }
            Predicate::Ne(field, value) if value.is_null() => {
                condition.add(column_for::<E>(field)?.is_not_null())
            }
            Predicate::Ne(field, value) => {
                // SQL `<>` drops NULL rows; match the in-memory semantics
                let column = column_for::<E>(field)?;
                let value = to_db_value(column.def().get_column_type(), value)?;
                condition.add(
                    Condition::any()
                        .add(column.ne(value))
                        .add(column.is_null()),
                )
            }
            Predicate::IsNull(field) => condition.add(column_for::<E>(field)?.is_null()),
            Predicate::NotNull(field) => condition.add(column_for::<E>(field)?.is_not_null()),
        };
    }
    Ok(condition)
}

fn to_db_value(column_type: &ColumnType, value: &Value) -> Result<DbValue, StoreError> {
    let invalid = || {
        StoreError::InvalidRecord(format!(
            "value {value} does not fit column type {column_type:?}"
        ))
    };

    let converted = match (column_type, value) {
        (_, Value::Null) => null_for(column_type),
        (ColumnType::Boolean, Value::Bool(b)) => DbValue::from(*b),
        (
            ColumnType::TinyInteger | ColumnType::SmallInteger | ColumnType::Integer,
            Value::Number(n),
        ) => {
            let n = n.as_i64().ok_or_else(invalid)?;
            DbValue::from(i32::try_from(n).map_err(|_| invalid())?)
        }
        (ColumnType::BigInteger, Value::Number(n)) => DbValue::from(n.as_i64().ok_or_else(invalid)?),
        (ColumnType::Float | ColumnType::Double | ColumnType::Decimal(_), Value::Number(n)) => {
            DbValue::from(n.as_f64().ok_or_else(invalid)?)
        }
        (
            ColumnType::Timestamp | ColumnType::TimestampWithTimeZone | ColumnType::DateTime,
            Value::String(s),
        ) => {
            let parsed = DateTime::parse_from_rfc3339(s).map_err(|_| invalid())?;
            DbValue::from(parsed.with_timezone(&Utc))
        }
        (ColumnType::Uuid, Value::String(s)) => {
            DbValue::from(Uuid::parse_str(s).map_err(|_| invalid())?)
        }
        (_, Value::String(s)) => DbValue::from(s.clone()),
        (_, Value::Bool(b)) => DbValue::from(*b),
        (_, Value::Number(n)) => match n.as_i64() {
            Some(i) => DbValue::from(i),
            None => DbValue::from(n.as_f64().ok_or_else(invalid)?),
        },
        (_, Value::Array(_) | Value::Object(_)) => return Err(invalid()),
    };
    Ok(converted)
}

fn null_for(column_type: &ColumnType) -> DbValue {
    match column_type {
        ColumnType::Boolean => Option::<bool>::None.into(),
        ColumnType::TinyInteger | ColumnType::SmallInteger | ColumnType::Integer => {
            Option::<i32>::None.into()
        }
        ColumnType::BigInteger => Option::<i64>::None.into(),
        ColumnType::Float | ColumnType::Double | ColumnType::Decimal(_) => {
            Option::<f64>::None.into()
        }
        ColumnType::Timestamp | ColumnType::TimestampWithTimeZone | ColumnType::DateTime => {
            Option::<DateTime<Utc>>::None.into()
        }
        ColumnType::Uuid => Option::<Uuid>::None.into(),
        _ => Option::<String>::None.into(),
    }
}

fn map_db_err(err: DbErr) -> StoreError {
    match err {
        DbErr::ConnectionAcquire(e) => {
            warn!(error = %e, "database connection unavailable");
            StoreError::Unavailable(e.to_string())
        }
        DbErr::Conn(e) => {
            warn!(error = %e, "database connection failed");
            StoreError::Unavailable(e.to_string())
        }
        other => StoreError::Backend(other.to_string()),
    }
}
