pub mod health;
pub mod labels;
pub mod positions;
pub mod volumes;

use std::{path::PathBuf, sync::Arc};

use crate::config::AppConfig;
use crate::services::{
    ClassificationService, LabelPrintCoordinator, LabelPrinter, SlotAllocator, SpoolPrinter,
    VolumeRegistry,
};
use crate::store::ResourceStore;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer shared by HTTP handlers and the CLI.
#[derive(Clone)]
pub struct AppServices {
    pub store: Arc<dyn ResourceStore>,
    pub registry: Arc<VolumeRegistry>,
    pub allocator: Arc<SlotAllocator>,
    pub printing: Arc<LabelPrintCoordinator>,
    pub classification: Arc<ClassificationService>,
}

impl AppServices {
    pub fn new(store: Arc<dyn ResourceStore>, printer: Arc<dyn LabelPrinter>) -> Self {
        Self::with_label_offset(store, printer, crate::services::volume_registry::DEFAULT_LABEL_OFFSET_MINUTES)
    }

    pub fn with_label_offset(
        store: Arc<dyn ResourceStore>,
        printer: Arc<dyn LabelPrinter>,
        label_offset_minutes: i32,
    ) -> Self {
        let registry = Arc::new(
            VolumeRegistry::new(store.clone()).with_label_offset_minutes(label_offset_minutes),
        );
        let allocator = Arc::new(SlotAllocator::new(store.clone(), registry.clone()));
        let printing = Arc::new(LabelPrintCoordinator::new(registry.clone(), printer));
        let classification = Arc::new(ClassificationService::new(registry.clone()));

        Self {
            store,
            registry,
            allocator,
            printing,
            classification,
        }
    }

    /// Wires services from configuration, spooling labels when a spool
    /// directory is configured.
    pub fn from_config(store: Arc<dyn ResourceStore>, config: &AppConfig) -> Self {
        let printer: Arc<dyn LabelPrinter> = match &config.print_spool_dir {
            Some(dir) => Arc::new(SpoolPrinter::with_spool_dir(PathBuf::from(dir))),
            None => Arc::new(SpoolPrinter::new()),
        };
        Self::with_label_offset(store, printer, config.label_utc_offset_minutes)
    }
}
