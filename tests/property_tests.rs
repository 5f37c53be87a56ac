//! Property-based tests for the label state machine, label codes and
//! position ordering.

use chrono::{FixedOffset, TimeZone, Utc};
use proptest::prelude::*;
use serde_json::json;
use strum::IntoEnumIterator;
use volume_ledger::{
    models::{LabelKind, NewPosition, VolumeCode, VolumeEvent, VolumeStatus},
    store::{fields, Filter},
};

fn status_strategy() -> impl Strategy<Value = VolumeStatus> {
    prop::sample::select(VolumeStatus::iter().collect::<Vec<_>>())
}

fn kind_strategy() -> impl Strategy<Value = LabelKind> {
    prop_oneof![Just(LabelKind::Volume), Just(LabelKind::Mother)]
}

fn event_strategy() -> impl Strategy<Value = VolumeEvent> {
    prop_oneof![
        Just(VolumeEvent::Print),
        Just(VolumeEvent::Reprint),
        "[A-Z][0-9]{1,3}".prop_map(|posicao| VolumeEvent::Store { posicao }),
        Just(VolumeEvent::Unstore),
        Just(VolumeEvent::Ship),
        Just(VolumeEvent::Receive),
        "[a-z ]{1,20}".prop_map(|reason| VolumeEvent::Invalidate { reason }),
        Just(VolumeEvent::Unitize),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn transitions_land_on_the_event_target(
        status in status_strategy(),
        kind in kind_strategy(),
        event in event_strategy(),
    ) {
        if let Some(next) = status.apply(kind, &event) {
            prop_assert!(!status.is_terminal());
            prop_assert_eq!(next, event.target());
        }
    }

    #[test]
    fn terminal_states_accept_nothing(
        kind in kind_strategy(),
        event in event_strategy(),
        terminal in prop_oneof![Just(VolumeStatus::Invalidated), Just(VolumeStatus::Unitized)],
    ) {
        prop_assert_eq!(terminal.apply(kind, &event), None);
    }

    #[test]
    fn any_live_label_can_be_invalidated(
        status in status_strategy(),
        kind in kind_strategy(),
        reason in "[a-z]{1,12}",
    ) {
        prop_assume!(!status.is_terminal());
        let event = VolumeEvent::Invalidate { reason };
        prop_assert_eq!(status.apply(kind, &event), Some(VolumeStatus::Invalidated));
    }

    #[test]
    fn mother_labels_never_move_through_storage(
        status in status_strategy(),
        event in prop_oneof![
            Just(VolumeEvent::Ship),
            Just(VolumeEvent::Receive),
            Just(VolumeEvent::Unstore),
            Just(VolumeEvent::Store { posicao: "E1".to_string() }),
        ],
    ) {
        prop_assert_eq!(status.apply(LabelKind::Mother, &event), None);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn generated_codes_are_well_formed(
        numero in "[0-9]{1,9}",
        volume in 1i32..=999,
        secs in 0i64..4_000_000_000,
        offset_hours in -12i32..=14,
    ) {
        let at = Utc.timestamp_opt(secs, 0).unwrap();
        let offset = FixedOffset::east_opt(offset_hours * 3600).unwrap();
        let code = VolumeCode::generate(&numero, volume, at, offset);

        prop_assert!(VolumeCode::is_well_formed(&code, &numero), "{}", code);
        let expected_prefix = format!("NF{}-{:03}-", numero, volume);
        prop_assert!(code.starts_with(&expected_prefix));
    }

    #[test]
    fn positions_sort_numerically_within_a_prefix(
        prefix in "[A-Z]{1,2}",
        a in 0u32..10_000,
        b in 0u32..10_000,
    ) {
        prop_assume!(a < b);
        let now = Utc::now();
        let make = |n: u32| NewPosition {
            posicao: format!("{prefix}{n}"),
            ..Default::default()
        }
        .into_position(now);

        prop_assert!(make(a).sort_key() < make(b).sort_key());
    }

    #[test]
    fn expectations_match_the_record_they_describe(
        status in status_strategy(),
        area in prop::option::of("[0-9]{2}"),
    ) {
        let record = fields(json!({ "status": status, "area": area, "codigo": "NF1-001" }));
        let expected = fields(json!({ "status": status, "area": area }));
        prop_assert!(Filter::from_expected(&expected).matches(&record));

        let other = VolumeStatus::iter().find(|s| *s != status).unwrap();
        let stale = fields(json!({ "status": other }));
        prop_assert!(!Filter::from_expected(&stale).matches(&record));
    }
}

mod exclusivity {
    use std::sync::Arc;

    use proptest::prelude::*;
    use uuid::Uuid;
    use volume_ledger::{
        models::{NewPosition, NewVolume, VolumeEvent, VolumeStatus},
        services::{SlotAllocator, VolumeRegistry},
        store::InMemoryStore,
    };

    #[derive(Debug, Clone)]
    enum Op {
        Assign { volume: usize, slot: usize },
        Release { slot: usize },
    }

    const SLOTS: [&str; 3] = ["E1", "C1", "D1"];
    const VOLUMES: usize = 4;

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => (0..VOLUMES, 0..SLOTS.len()).prop_map(|(volume, slot)| Op::Assign { volume, slot }),
            1 => (0..SLOTS.len()).prop_map(|slot| Op::Release { slot }),
        ]
    }

    async fn run(ops: Vec<Op>) -> Result<(), TestCaseError> {
        let store = Arc::new(InMemoryStore::new());
        let registry = Arc::new(VolumeRegistry::new(store.clone()));
        let allocator = SlotAllocator::new(store, registry.clone());
        for code in SLOTS {
            allocator
                .ensure_position(NewPosition {
                    posicao: code.to_string(),
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        let mut ids: Vec<Uuid> = Vec::new();
        for numero in 1..=VOLUMES as i32 {
            let volume = registry
                .create(NewVolume {
                    nota_fiscal_id: "nf-prop".into(),
                    quantidade: 1,
                    volume_numero: numero,
                    total_volumes: VOLUMES as i32,
                    ..Default::default()
                })
                .await
                .unwrap();
            registry.transition(volume.id, VolumeEvent::Print).await.unwrap();
            ids.push(volume.id);
        }

        for op in ops {
            match op {
                Op::Assign { volume, slot } => {
                    let _ = allocator.assign(ids[volume], SLOTS[slot]).await;
                }
                Op::Release { slot } => {
                    allocator.release(SLOTS[slot]).await.unwrap();
                }
            }

            // every stored volume sits in exactly the slot that names it
            let mut occupants = Vec::new();
            for code in SLOTS {
                let position = allocator.get_position(code).await.unwrap();
                prop_assert_eq!(position.ocupada, position.volume_id.is_some());
                if let Some(occupant) = position.volume_id {
                    prop_assert!(!occupants.contains(&occupant), "{} holds two slots", occupant);
                    occupants.push(occupant);
                    let volume = registry.get(occupant).await.unwrap();
                    prop_assert_eq!(volume.posicao.as_deref(), Some(code));
                }
            }
            for id in &ids {
                let volume = registry.get(*id).await.unwrap();
                prop_assert_eq!(
                    volume.status == VolumeStatus::Stored,
                    occupants.contains(id)
                );
            }
        }
        Ok(())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn slots_never_hold_two_volumes(ops in prop::collection::vec(op_strategy(), 1..30)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(run(ops))?;
        }
    }
}
