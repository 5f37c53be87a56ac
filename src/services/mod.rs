pub mod classification;
pub mod label_print;
pub mod label_printer;
pub mod slot_allocator;
pub mod volume_registry;

pub use classification::{ClassificationRequest, ClassificationService};
pub use label_print::{LabelPrintCoordinator, PrintBatch, PrintOutcome};
pub use label_printer::{
    LabelLayout, LabelPrinter, PrintArtifact, PrintError, PrintFormat, PrintJob, SpoolPrinter,
};
pub use slot_allocator::{Assignment, SlotAllocator};
pub use volume_registry::VolumeRegistry;
