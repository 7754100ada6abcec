//! Content cache replication after tracking.

use pretty_assertions::assert_eq;

use e2e_tests::{document, document_with_content, TestHarness};
use tracker_cache::{sync_replica, ContentCache, NO_VERSION_AVAILABLE};
use tracker_core::Tracker;
use tracker_search::IndexDocument;
use tracker_types::DEFAULT_TENANT;

fn cached(cache: &ContentCache, id: u64) -> Option<IndexDocument> {
    cache
        .retrieve(DEFAULT_TENANT, id)
        .unwrap()
        .map(|bytes| IndexDocument::from_bytes(&bytes).unwrap())
}

fn replica(harness: &TestHarness) -> ContentCache {
    let replica = ContentCache::open(harness._temp_dir.path().join("replica")).unwrap();
    replica.toggle_read_only(true).unwrap();
    replica
}

#[tokio::test]
async fn test_replica_catches_up_with_committed_cache() {
    let harness = TestHarness::new().await;
    harness.client.add_updates(
        1,
        1_000,
        vec![
            document(1, 1, 10, "plain"),
            document_with_content(2, 1, 10, "scanned"),
        ],
    );
    harness.client.put_content(2, "invoice number");
    harness.run_cycles(2).await;

    let replica = replica(&harness);
    assert_eq!(replica.last_committed_version().unwrap(), NO_VERSION_AVAILABLE);

    let report = sync_replica(&harness.cache, &replica).unwrap();
    assert_eq!(report.from_version, NO_VERSION_AVAILABLE);
    assert_eq!(report.to_version, harness.cache.last_committed_version().unwrap());
    assert_eq!(cached(&replica, 1), cached(&harness.cache, 1));
    let scanned = cached(&replica, 2).unwrap();
    assert!(scanned.text.contains("invoice"));
}

#[tokio::test]
async fn test_replica_follows_deletes() {
    let harness = TestHarness::new().await;
    harness.client.add_updates(
        1,
        1_000,
        vec![document(1, 1, 10, "keep"), document(2, 1, 10, "drop")],
    );
    harness.run_cycle().await.unwrap();
    let replica = replica(&harness);
    sync_replica(&harness.cache, &replica).unwrap();
    assert!(cached(&replica, 2).is_some());

    harness.client.add_deletes(2, 2_000, &[2]);
    harness.run_cycle().await.unwrap();
    let report = sync_replica(&harness.cache, &replica).unwrap();

    assert_eq!(report.deleted, 1);
    assert!(cached(&replica, 1).is_some());
    assert!(cached(&replica, 2).is_none());
    assert_eq!(
        replica.last_committed_version().unwrap(),
        harness.cache.last_committed_version().unwrap()
    );
}

#[tokio::test]
async fn test_uncommitted_writes_are_not_replicated() {
    let harness = TestHarness::new().await;
    harness.client.add_updates(1, 1_000, vec![document(1, 1, 10, "early")]);
    harness.run_cycle().await.unwrap();
    let replica = replica(&harness);
    sync_replica(&harness.cache, &replica).unwrap();

    // Indexed by the metadata tracker but not yet committed
    harness.client.add_updates(2, 2_000, vec![document(3, 2, 10, "late")]);
    harness.core.metadata.track().await.unwrap();
    assert!(!harness.cache.pending_changes().unwrap().is_empty());

    let report = sync_replica(&harness.cache, &replica).unwrap();
    assert_eq!(report.added, 0);
    assert!(cached(&replica, 3).is_none());
}
