use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use tracing::trace;

use super::{key_of, EntityKind, Filter, Record, ResourceStore, StoreError};

/// Process-local store backed by a sharded map.
///
/// Conditional updates hold the entry lock while checking and writing, so
/// concurrent `update_if` calls on one key are linearizable.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    records: Arc<DashMap<(EntityKind, String), Record>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        self.records.iter().filter(|e| e.key().0 == kind).count()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn merge(record: &mut Record, kind: EntityKind, patch: Record) {
        for (field, value) in patch {
            if field != kind.key_field() {
                record.insert(field, value);
            }
        }
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn find(&self, kind: EntityKind, filter: &Filter) -> Result<Vec<Record>, StoreError> {
        let mut matches: Vec<(String, Record)> = self
            .records
            .iter()
            .filter(|entry| entry.key().0 == kind && filter.matches(entry.value()))
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect();
        matches.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(matches.into_iter().map(|(_, record)| record).collect())
    }

    async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Record>, StoreError> {
        Ok(self
            .records
            .get(&(kind, id.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn insert(&self, kind: EntityKind, record: Record) -> Result<Record, StoreError> {
        let id = key_of(kind, &record)?;
        match self.records.entry((kind, id.clone())) {
            Entry::Occupied(_) => Err(StoreError::Duplicate { kind, id }),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                trace!(%kind, %id, "record inserted");
                Ok(record)
            }
        }
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: &str,
        patch: Record,
    ) -> Result<Record, StoreError> {
        let mut entry = self
            .records
            .get_mut(&(kind, id.to_string()))
            .ok_or_else(|| StoreError::NotFound {
                kind,
                id: id.to_string(),
            })?;
        Self::merge(entry.value_mut(), kind, patch);
        Ok(entry.value().clone())
    }

    async fn update_if(
        &self,
        kind: EntityKind,
        id: &str,
        expected: &Record,
        patch: Record,
    ) -> Result<Record, StoreError> {
        let mut entry = self
            .records
            .get_mut(&(kind, id.to_string()))
            .ok_or_else(|| StoreError::NotFound {
                kind,
                id: id.to_string(),
            })?;
        if !Filter::from_expected(expected).matches(entry.value()) {
            return Err(StoreError::PreconditionFailed {
                kind,
                id: id.to_string(),
            });
        }
        Self::merge(entry.value_mut(), kind, patch);
        Ok(entry.value().clone())
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), StoreError> {
        self.records
            .remove(&(kind, id.to_string()))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound {
                kind,
                id: id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fields;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn slot(code: &str) -> Record {
        fields(json!({"posicao": code, "area": "04", "volume_id": null}))
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_keys() {
        let store = InMemoryStore::new();
        store.insert(EntityKind::Position, slot("E1")).await.unwrap();

        let err = store
            .insert(EntityKind::Position, slot("E1"))
            .await
            .unwrap_err();
        assert_matches!(err, StoreError::Duplicate { .. });
    }

    #[tokio::test]
    async fn update_if_checks_expected_fields() {
        let store = InMemoryStore::new();
        store.insert(EntityKind::Position, slot("E1")).await.unwrap();

        let free = fields(json!({"volume_id": null}));
        store
            .update_if(
                EntityKind::Position,
                "E1",
                &free,
                fields(json!({"volume_id": "v-1"})),
            )
            .await
            .unwrap();

        let err = store
            .update_if(
                EntityKind::Position,
                "E1",
                &free,
                fields(json!({"volume_id": "v-2"})),
            )
            .await
            .unwrap_err();
        assert_matches!(err, StoreError::PreconditionFailed { .. });

        let current = store.get(EntityKind::Position, "E1").await.unwrap().unwrap();
        assert_eq!(current["volume_id"], json!("v-1"));
    }

    #[tokio::test]
    async fn patches_cannot_rewrite_the_key() {
        let store = InMemoryStore::new();
        store.insert(EntityKind::Position, slot("E1")).await.unwrap();

        let updated = store
            .update(EntityKind::Position, "E1", fields(json!({"posicao": "E9"})))
            .await
            .unwrap();
        assert_eq!(updated["posicao"], json!("E1"));
    }

    #[tokio::test]
    async fn delete_of_missing_key_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.delete(EntityKind::Volume, "nope").await.unwrap_err();
        assert_matches!(err, StoreError::NotFound { .. });
    }
}
