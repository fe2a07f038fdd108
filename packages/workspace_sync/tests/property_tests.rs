use std::cmp::Ordering;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use workspace_sync::{
    InstanceState, Phase, PresentationCategory, Reconciler, RecencyMarker, Scope, UpdateEvent,
    WorkspaceSession,
};

// --- Strategies ---

fn arb_phase() -> impl Strategy<Value = Phase> {
    proptest::sample::select(Phase::ALL.to_vec())
}

fn arb_marker() -> impl Strategy<Value = RecencyMarker> {
    (
        prop_oneof![Just("i-1"), Just("i-2"), Just("i-3")],
        0i64..5,
        0u64..6,
    )
        .prop_map(|(instance, secs, version)| RecencyMarker {
            instance_id: instance.to_string(),
            created_at: Utc.timestamp_opt(1_700_000_000 + secs * 60, 0).unwrap(),
            version,
        })
}

fn arb_state() -> impl Strategy<Value = InstanceState> {
    (arb_phase(), arb_marker(), proptest::option::of("[a-z ]{0,8}")).prop_map(
        |(phase, recency, failure)| InstanceState {
            phase,
            failure,
            ide_url: format!("https://{}.ws.example", recency.instance_id),
            recency,
        },
    )
}

fn session(id: &str, state: InstanceState) -> WorkspaceSession {
    WorkspaceSession {
        id: id.to_string(),
        context_url: format!("https://github.com/acme/{id}"),
        latest: state,
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// --- Recency order ---

proptest! {
    #[test]
    fn compare_is_antisymmetric(a in arb_marker(), b in arb_marker()) {
        prop_assert_eq!(a.compare(&b), b.compare(&a).reverse());
    }

    #[test]
    fn nothing_is_newer_than_itself(a in arb_marker()) {
        prop_assert!(!a.is_newer_than(&a));
    }

    #[test]
    fn newer_is_transitive(a in arb_marker(), b in arb_marker(), c in arb_marker()) {
        if a.is_newer_than(&b) && b.is_newer_than(&c) {
            prop_assert!(a.is_newer_than(&c));
        }
    }

    #[test]
    fn exactly_one_of_newer_older_or_tied(a in arb_marker(), b in arb_marker()) {
        let outcomes = [a.is_newer_than(&b), b.is_newer_than(&a), a.compare(&b) == Ordering::Equal];
        prop_assert_eq!(outcomes.iter().filter(|o| **o).count(), 1);
    }

    #[test]
    fn every_phase_has_one_category(phase in arb_phase(), failure in proptest::option::of(".{0,6}")) {
        let state = InstanceState {
            phase,
            failure,
            ide_url: String::new(),
            recency: RecencyMarker {
                instance_id: "i".into(),
                created_at: Utc.timestamp_opt(0, 0).unwrap(),
                version: 0,
            },
        };
        let category = state.category();
        match phase {
            Phase::Running => prop_assert_eq!(category, PresentationCategory::Connectable),
            Phase::Stopped => prop_assert!(matches!(
                category,
                PresentationCategory::StoppedOk | PresentationCategory::StoppedFailed
            )),
            Phase::Interrupted | Phase::Unknown => {
                prop_assert_eq!(category, PresentationCategory::StoppedFailed)
            }
            _ => prop_assert_eq!(category, PresentationCategory::Transitioning),
        }
    }
}

// --- Reconciler acceptance ---

proptest! {
    /// A single update replaces the stored state iff its marker is strictly newer.
    #[test]
    fn update_applied_iff_strictly_newer(stored in arb_state(), incoming in arb_state()) {
        let rt = runtime();
        let (applied, table, renders) = rt.block_on(async {
            let (reconciler, mut rx) = Reconciler::new();
            let scope = Scope::root();
            reconciler.apply_snapshot(&scope, vec![session("A", stored.clone())]).await;
            rx.try_recv().unwrap();

            let applied = reconciler
                .apply_update(&scope, UpdateEvent { session_id: "A".into(), state: incoming.clone() })
                .await;
            let mut renders = 0;
            while rx.try_recv().is_ok() {
                renders += 1;
            }
            (applied, reconciler.current().await, renders)
        });

        let newer = incoming.recency.is_newer_than(&stored.recency);
        prop_assert_eq!(applied, newer);
        prop_assert_eq!(renders, usize::from(newer));
        let expected = if newer { &incoming } else { &stored };
        prop_assert_eq!(&table.get("A").unwrap().latest, expected);
    }

    /// Across any delivery order, each accepted step is newer than what it
    /// replaced and exactly one render is produced per acceptance.
    #[test]
    fn table_never_regresses(initial in arb_state(), updates in proptest::collection::vec(arb_state(), 0..24)) {
        let rt = runtime();
        rt.block_on(async {
            let (reconciler, mut rx) = Reconciler::new();
            let scope = Scope::root();
            reconciler.apply_snapshot(&scope, vec![session("A", initial)]).await;
            rx.try_recv().unwrap();

            for state in updates {
                let before = reconciler.current().await.get("A").unwrap().latest.clone();
                let applied = reconciler
                    .apply_update(&scope, UpdateEvent { session_id: "A".into(), state })
                    .await;
                let after = reconciler.current().await.get("A").unwrap().latest.clone();

                if applied {
                    assert!(after.recency.is_newer_than(&before.recency));
                    assert!(rx.try_recv().is_ok());
                } else {
                    assert_eq!(after, before);
                }
                assert!(rx.try_recv().is_err());
            }
        });
    }
}
