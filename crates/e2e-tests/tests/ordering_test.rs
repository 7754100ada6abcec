//! Reindex idempotence, marker monotonicity and deadlock freedom.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use rand::Rng;

use e2e_tests::{document, TestHarness};
use tracker_core::{MaintenanceAction, Scope, Tracker, COMMIT_LOCK_ORDER};
use tracker_search::{node_doc_id, DocType, Predicate};
use tracker_types::{BatchSettings, TrackerKind};

#[tokio::test]
async fn test_reindex_transaction_is_idempotent() {
    let harness = TestHarness::new().await;
    harness.client.add_updates(
        1,
        1_000,
        vec![
            document(1, 1, 10, "first"),
            document(2, 1, 10, "second"),
            document(3, 1, 10, "third"),
        ],
    );
    harness.run_cycle().await.unwrap();
    let before: Vec<_> = (1..=3).map(|id| harness.get(&node_doc_id(id))).collect();

    harness
        .core
        .apply(MaintenanceAction::Reindex(Scope::Transaction, 1))
        .unwrap();
    harness.run_cycle().await.unwrap();

    let after: Vec<_> = (1..=3).map(|id| harness.get(&node_doc_id(id))).collect();
    assert_eq!(after, before);
    assert_eq!(harness.count(&Predicate::DocType(DocType::Node)), 3);
    assert_eq!(harness.durable_marker(TrackerKind::Metadata), 1);
}

#[tokio::test]
async fn test_marker_never_decreases_across_cycles() {
    let harness = TestHarness::with_batch(BatchSettings {
        transactions_per_cycle: 2,
        ..BatchSettings::default()
    })
    .await;
    for txid in 1..=7 {
        harness
            .client
            .add_updates(txid, txid * 1_000, vec![document(txid, txid, 10, "doc")]);
    }

    let mut markers = Vec::new();
    for _ in 0..5 {
        harness.run_cycle().await.unwrap();
        markers.push(harness.durable_marker(TrackerKind::Metadata));
    }

    assert_eq!(markers, vec![2, 4, 6, 7, 7]);
    let state = harness.core.metadata.state_snapshot().unwrap();
    assert_eq!(state.last_indexed_commit_time_ms, 7_000);
}

#[tokio::test]
async fn test_commit_locks_in_fixed_order() {
    let harness = TestHarness::new().await;
    assert_eq!(
        COMMIT_LOCK_ORDER,
        [
            TrackerKind::Cascade,
            TrackerKind::Content,
            TrackerKind::Metadata,
            TrackerKind::Acl,
        ]
    );
    assert_eq!(harness.core.commit.lock_order(), COMMIT_LOCK_ORDER.to_vec());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_trackers_do_not_deadlock() {
    let harness = TestHarness::with_batch(BatchSettings {
        transactions_per_cycle: 3,
        node_batch_size: 2,
        ..BatchSettings::default()
    })
    .await;
    for txid in 1..=30 {
        harness.client.add_updates(
            txid,
            txid * 1_000,
            vec![document(txid, txid, 10, "doc"), document(100 + txid, txid, 10, "doc")],
        );
    }

    let trackers = harness.core.all();
    let rounds = tokio::time::timeout(Duration::from_secs(60), async {
        for _ in 0..20 {
            let latency = rand::rng().random_range(0..3);
            harness.client.set_latency(Duration::from_millis(latency));

            let handles: Vec<_> = trackers
                .iter()
                .map(|tracker| {
                    let tracker: Arc<dyn Tracker> = tracker.clone();
                    tokio::spawn(async move {
                        let jitter = rand::rng().random_range(0..5);
                        tokio::time::sleep(Duration::from_millis(jitter)).await;
                        tracker.track().await
                    })
                })
                .collect();
            for result in futures::future::join_all(handles).await {
                result.expect("tracker task panicked").unwrap();
            }
        }
    })
    .await;
    assert!(rounds.is_ok(), "trackers deadlocked");

    harness.client.set_latency(Duration::ZERO);
    for _ in 0..12 {
        harness.run_cycle().await.unwrap();
    }
    assert_eq!(harness.count(&Predicate::DocType(DocType::Node)), 60);
    assert_eq!(harness.durable_marker(TrackerKind::Metadata), 30);
    assert_eq!(harness.core.commit.rollback_count(), 0);
}
