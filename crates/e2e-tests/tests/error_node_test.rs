//! Error node isolation in large transactions.

use pretty_assertions::assert_eq;

use e2e_tests::{document, TestHarness};
use tracker_core::MaintenanceAction;
use tracker_search::{node_doc_id, DocType, Predicate};
use tracker_types::TrackerKind;

fn large_transaction(txid: u64, count: u64) -> Vec<tracker_types::NodeMetaData> {
    (1..=count).map(|id| document(id, txid, 10, "bulk")).collect()
}

#[tokio::test]
async fn test_large_transaction_is_fetched_in_chunks() {
    let harness = TestHarness::new().await;
    harness.client.add_updates(1, 1_000, large_transaction(1, 600));

    harness.run_cycle().await.unwrap();

    let sizes = harness.client.metadata_request_sizes();
    assert_eq!(sizes, vec![50; 12]);
    assert_eq!(harness.count(&Predicate::DocType(DocType::Node)), 600);
    assert_eq!(harness.durable_marker(TrackerKind::Metadata), 1);
}

#[tokio::test]
async fn test_bad_node_becomes_error_node_and_retry_recovers_it() {
    let harness = TestHarness::new().await;
    harness.client.add_updates(1, 1_000, large_transaction(1, 600));
    harness.client.fail_node(7);

    harness.run_cycle().await.unwrap();

    let sizes = harness.client.metadata_request_sizes();
    assert_eq!(sizes.iter().filter(|&&s| s == 50).count(), 12);
    assert_eq!(sizes.iter().filter(|&&s| s == 1).count(), 50);
    assert_eq!(harness.count(&Predicate::DocType(DocType::Node)), 599);
    assert_eq!(harness.count(&Predicate::DocType(DocType::ErrorNode)), 1);
    let stub = harness.get(&node_doc_id(7)).unwrap();
    assert_eq!(stub.doc_type, DocType::ErrorNode);
    assert_eq!(stub.txid, Some(1));
    assert!(stub.error.is_some());

    // The marker moves past the transaction despite the stub
    assert_eq!(harness.durable_marker(TrackerKind::Metadata), 1);
    assert_eq!(harness.core.commit.rollback_count(), 0);

    harness.client.heal_node(7);
    harness.core.apply(MaintenanceAction::Retry).unwrap();
    harness.run_cycle().await.unwrap();

    assert_eq!(harness.count(&Predicate::DocType(DocType::ErrorNode)), 0);
    assert_eq!(harness.count(&Predicate::DocType(DocType::Node)), 600);
    assert_eq!(harness.get(&node_doc_id(7)).unwrap().doc_type, DocType::Node);
}

#[tokio::test]
async fn test_node_rejected_by_model_is_isolated() {
    let harness = TestHarness::new().await;
    let bad = document(2, 1, 10, "bad").with_property(
        "cm:size",
        tracker_types::PropertyValue::text("not a number"),
    );
    harness
        .client
        .add_updates(1, 1_000, vec![document(1, 1, 10, "good"), bad]);

    harness.run_cycle().await.unwrap();

    assert_eq!(harness.get(&node_doc_id(1)).unwrap().doc_type, DocType::Node);
    assert_eq!(harness.get(&node_doc_id(2)).unwrap().doc_type, DocType::ErrorNode);
    assert_eq!(harness.durable_marker(TrackerKind::Metadata), 1);
}
