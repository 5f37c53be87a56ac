mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use common::{candidate, ScriptedStore};
use volume_ledger::{
    errors::ServiceError,
    models::VolumeStatus,
    services::{
        LabelLayout, LabelPrintCoordinator, PrintFormat, PrintOutcome, SpoolPrinter,
        VolumeRegistry,
    },
};

struct Harness {
    store: Arc<ScriptedStore>,
    registry: Arc<VolumeRegistry>,
    printer: Arc<SpoolPrinter>,
    coordinator: LabelPrintCoordinator,
}

fn harness() -> Harness {
    let store = ScriptedStore::new();
    let registry = Arc::new(VolumeRegistry::new(store.clone()));
    let printer = Arc::new(SpoolPrinter::new());
    let coordinator = LabelPrintCoordinator::new(registry.clone(), printer.clone());
    Harness {
        store,
        registry,
        printer,
        coordinator,
    }
}

#[tokio::test]
async fn first_print_creates_and_prints_every_sibling() {
    let h = harness();
    let target = candidate("nf-1", 1, 3);
    let siblings = vec![candidate("nf-1", 2, 3), candidate("nf-1", 3, 3)];

    let outcome = h
        .coordinator
        .request_print(target, siblings, PrintFormat::A4, LabelLayout::Default)
        .await
        .unwrap();

    assert_matches!(outcome, PrintOutcome::Printed { updated_volumes, artifact } => {
        assert_eq!(updated_volumes.len(), 3);
        assert!(updated_volumes.iter().all(|v| v.status == VolumeStatus::Printed));
        assert!(updated_volumes.iter().all(|v| v.data_impressao.is_some()));
        assert_eq!(artifact.label_count, 3);
        assert_eq!(artifact.page_count, 1);
    });
    assert_eq!(h.printer.artifacts().len(), 1);
}

#[tokio::test]
async fn existing_labels_require_confirmation_without_writing() {
    let h = harness();
    h.registry.create(candidate("nf-2", 1, 2)).await.unwrap();
    h.store.reset_counters();

    let outcome = h
        .coordinator
        .request_print(
            candidate("nf-2", 1, 2),
            vec![candidate("nf-2", 2, 2)],
            PrintFormat::Label100x150,
            LabelLayout::Compact,
        )
        .await
        .unwrap();

    assert_matches!(outcome, PrintOutcome::NeedsConfirmation { existing_count: 1, pending } => {
        assert_eq!(pending.siblings.len(), 2);
        assert_eq!(pending.format, PrintFormat::Label100x150);
    });
    assert_eq!(h.store.writes(), 0);
    assert!(h.printer.artifacts().is_empty());
}

#[tokio::test]
async fn invalidated_labels_do_not_trigger_confirmation() {
    let h = harness();
    let old = h.registry.create(candidate("nf-3", 1, 1)).await.unwrap();
    h.registry.invalidate(old.id, "etiqueta rasgada").await.unwrap();

    let outcome = h
        .coordinator
        .request_print(candidate("nf-3", 1, 1), vec![], PrintFormat::A4, LabelLayout::Default)
        .await
        .unwrap();

    assert_matches!(outcome, PrintOutcome::Printed { .. });
}

#[tokio::test]
async fn confirming_reprints_the_same_volumes() {
    let h = harness();
    let first = candidate("nf-4", 1, 2);
    let second = candidate("nf-4", 2, 2);
    h.coordinator
        .request_print(first.clone(), vec![second.clone()], PrintFormat::A4, LabelLayout::Default)
        .await
        .unwrap();

    let outcome = h
        .coordinator
        .request_print(first.clone(), vec![second.clone()], PrintFormat::A4, LabelLayout::Default)
        .await
        .unwrap();
    let pending = match outcome {
        PrintOutcome::NeedsConfirmation { existing_count, pending } => {
            assert_eq!(existing_count, 2);
            pending
        }
        other => panic!("expected confirmation, got {other:?}"),
    };

    let confirmed = h
        .coordinator
        .confirm_and_print(pending, PrintFormat::Label50x100, LabelLayout::Enhanced)
        .await
        .unwrap();

    assert_matches!(confirmed, PrintOutcome::Printed { updated_volumes, artifact } => {
        assert_eq!(updated_volumes.len(), 2);
        assert_eq!(artifact.format, PrintFormat::Label50x100);
        assert_eq!(artifact.layout, LabelLayout::Enhanced);
    });
    assert_eq!(h.registry.list_by_document("nf-4").await.unwrap().len(), 2);
    assert_eq!(h.printer.artifacts().len(), 2);
}

#[tokio::test]
async fn failed_sibling_write_is_reported_as_partial_commit() {
    let h = harness();
    let vol1 = candidate("nf-5", 1, 3);
    let vol2 = candidate("nf-5", 2, 3);
    let vol3 = candidate("nf-5", 3, 3);
    let (id1, id2, id3) = (vol1.id.unwrap(), vol2.id.unwrap(), vol3.id.unwrap());
    h.store.fail_writes_for(id2);

    let err = h
        .coordinator
        .request_print(
            vol1.clone(),
            vec![vol1, vol2, vol3],
            PrintFormat::A4,
            LabelLayout::Default,
        )
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::PartialCommit(report) => {
        assert_eq!(report.succeeded, vec![id1, id3]);
        assert_eq!(report.failed, vec![id2]);
    });
    assert_eq!(h.registry.get(id1).await.unwrap().status, VolumeStatus::Printed);
    assert_eq!(h.registry.get(id3).await.unwrap().status, VolumeStatus::Printed);
    assert!(h.registry.find(id2).await.unwrap().is_none());
}

#[tokio::test]
async fn reprint_refreshes_print_time() {
    let h = harness();
    let first = candidate("nf-6", 1, 2);
    let second = candidate("nf-6", 2, 2);
    let (id1, id2) = (first.id.unwrap(), second.id.unwrap());
    h.coordinator
        .request_print(first, vec![second], PrintFormat::A4, LabelLayout::Default)
        .await
        .unwrap();
    let printed_at = h.registry.get(id1).await.unwrap().data_impressao.unwrap();

    h.coordinator
        .reprint(id1, &[id2], PrintFormat::A4, LabelLayout::Default)
        .await
        .unwrap();

    let volume = h.registry.get(id1).await.unwrap();
    assert_eq!(volume.status, VolumeStatus::Printed);
    assert!(volume.data_impressao.unwrap() >= printed_at);
    let artifacts = h.printer.artifacts();
    assert_eq!(artifacts.len(), 2);
    assert_eq!(artifacts[1].label_count, 2);
}

#[tokio::test]
async fn reprint_rejects_unprinted_volumes() {
    let h = harness();
    let volume = h.registry.create(candidate("nf-7", 1, 1)).await.unwrap();

    let err = h
        .coordinator
        .reprint(volume.id, &[], PrintFormat::A4, LabelLayout::Default)
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::Conflict { current: VolumeStatus::Generated, .. });
    assert!(h.printer.artifacts().is_empty());
}

#[tokio::test]
async fn second_of_three_saves_failing_leaves_it_generated_or_absent() {
    let h = harness();
    let vols: Vec<_> = (1..=3).map(|n| candidate("nf-8", n, 3)).collect();
    let ids: Vec<_> = vols.iter().map(|v| v.id.unwrap()).collect();
    h.store.fail_nth_write(2);

    let err = h
        .coordinator
        .request_print(vols[0].clone(), vols.clone(), PrintFormat::A4, LabelLayout::Default)
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::PartialCommit(report) => {
        assert_eq!(report.succeeded, vec![ids[0], ids[2]]);
        assert_eq!(report.failed, vec![ids[1]]);
    });
    let printed: Vec<_> = h
        .registry
        .list_by_document("nf-8")
        .await
        .unwrap()
        .into_iter()
        .filter(|v| v.status == VolumeStatus::Printed)
        .map(|v| v.id)
        .collect();
    assert_eq!(printed, vec![ids[0], ids[2]]);
}
