#![allow(dead_code)]

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;
use volume_ledger::{
    config::AppConfig,
    models::{NewVolume, Volume, VolumeEvent},
    services::{LabelPrinter, SpoolPrinter, VolumeRegistry},
    store::{EntityKind, Filter, InMemoryStore, Record, ResourceStore, StoreError},
    AppServices, AppState,
};

/// In-memory store that counts traffic and fails scripted writes.
#[derive(Default)]
pub struct ScriptedStore {
    inner: InMemoryStore,
    reads: AtomicUsize,
    writes: AtomicUsize,
    failing_ids: Mutex<HashSet<String>>,
    fail_on_write: Mutex<Option<usize>>,
    down: AtomicBool,
}

impl ScriptedStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.reads.store(0, Ordering::SeqCst);
        self.writes.store(0, Ordering::SeqCst);
    }

    /// Every write touching `id` fails with `Unavailable` from now on.
    pub fn fail_writes_for(&self, id: impl ToString) {
        self.failing_ids.lock().unwrap().insert(id.to_string());
    }

    /// The `n`-th write from now (1-based) fails with `Unavailable`.
    pub fn fail_nth_write(&self, n: usize) {
        *self.fail_on_write.lock().unwrap() = Some(self.writes() + n);
    }

    pub fn heal(&self, id: impl ToString) {
        self.failing_ids.lock().unwrap().remove(&id.to_string());
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("scripted outage".into()));
        }
        Ok(())
    }

    fn before_write(&self, id: &str) -> Result<(), StoreError> {
        self.check_available()?;
        if self.failing_ids.lock().unwrap().contains(id) {
            return Err(StoreError::Unavailable(format!("scripted failure for {id}")));
        }
        let attempt = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        let mut scheduled = self.fail_on_write.lock().unwrap();
        if *scheduled == Some(attempt) {
            *scheduled = None;
            return Err(StoreError::Unavailable(format!("scripted failure of write {attempt}")));
        }
        Ok(())
    }

    fn key(kind: EntityKind, record: &Record) -> String {
        record
            .get(kind.key_field())
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }
}

#[async_trait]
impl ResourceStore for ScriptedStore {
    async fn find(&self, kind: EntityKind, filter: &Filter) -> Result<Vec<Record>, StoreError> {
        self.check_available()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.find(kind, filter).await
    }

    async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Record>, StoreError> {
        self.check_available()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get(kind, id).await
    }

    async fn insert(&self, kind: EntityKind, record: Record) -> Result<Record, StoreError> {
        self.before_write(&Self::key(kind, &record))?;
        self.inner.insert(kind, record).await
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: &str,
        patch: Record,
    ) -> Result<Record, StoreError> {
        self.before_write(id)?;
        self.inner.update(kind, id, patch).await
    }

    async fn update_if(
        &self,
        kind: EntityKind,
        id: &str,
        expected: &Record,
        patch: Record,
    ) -> Result<Record, StoreError> {
        self.before_write(id)?;
        self.inner.update_if(kind, id, expected, patch).await
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), StoreError> {
        self.before_write(id)?;
        self.inner.delete(kind, id).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}

pub fn candidate(nota_fiscal_id: &str, numero: i32, total: i32) -> NewVolume {
    NewVolume {
        id: Some(Uuid::new_v4()),
        nota_fiscal_id: nota_fiscal_id.to_string(),
        numero_nf: Some("4471".to_string()),
        quantidade: 1,
        volume_numero: numero,
        total_volumes: total,
        altura_cm: Some(40.0),
        largura_cm: Some(30.0),
        comprimento_cm: Some(50.0),
        peso_total_bruto: Some(12.5),
        ..Default::default()
    }
}

/// Creates a volume and prints it so it can be stored.
pub async fn printed_volume(registry: &VolumeRegistry, nota_fiscal_id: &str, numero: i32) -> Volume {
    let volume = registry
        .create(candidate(nota_fiscal_id, numero, 10))
        .await
        .expect("create volume");
    registry
        .transition(volume.id, VolumeEvent::Print)
        .await
        .expect("print volume")
}

pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::new(
        "sqlite::memory:".to_string(),
        "127.0.0.1".to_string(),
        18_080,
        "test".to_string(),
    );
    cfg.store_backend = "memory".to_string();
    cfg
}

/// Router over a scripted in-memory store.
pub struct TestApp {
    router: Router,
    pub store: Arc<ScriptedStore>,
    pub services: AppServices,
}

impl TestApp {
    pub fn new() -> Self {
        let store = ScriptedStore::new();
        let printer: Arc<dyn LabelPrinter> = Arc::new(SpoolPrinter::new());
        let services = AppServices::new(store.clone(), printer);
        let state = AppState::new(test_config(), services.clone());
        Self {
            router: volume_ledger::build_router(state),
            store,
            services,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request");

        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("failed to read response body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }
}
