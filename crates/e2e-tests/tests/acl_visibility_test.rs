//! Authority-partitioned visibility across the ACL and metadata trackers.

use std::collections::BTreeSet;

use pretty_assertions::assert_eq;

use e2e_tests::{document_with_content, readers, TestHarness};
use tracker_search::{DocType, Predicate};
use tracker_types::{AclChangeSet, TrackerKind};

fn dbids(docs: &[tracker_search::IndexDocument]) -> BTreeSet<u64> {
    docs.iter().filter_map(|d| d.dbid).collect()
}

async fn joel_jim_phil() -> TestHarness {
    let harness = TestHarness::new().await;
    harness.client.add_acl_change_set(
        AclChangeSet::new(1, 1_000, 2),
        vec![
            readers(100, &["joel", "phil"]),
            readers(101, &["jim", "phil"]),
        ],
    );
    harness.run_cycle().await.unwrap();
    harness
}

#[tokio::test]
async fn test_acl_change_set_is_indexed() {
    let harness = joel_jim_phil().await;

    assert_eq!(harness.count(&Predicate::DocType(DocType::Acl)), 2);
    assert_eq!(harness.durable_marker(TrackerKind::Acl), 1);
    let state = harness.get("TRACKER!STATE!ACLTX").unwrap();
    assert_eq!(state.doc_type, DocType::State);
    assert_eq!(state.last_indexed_id, Some(1));
}

#[tokio::test]
async fn test_readers_see_disjoint_halves() {
    let harness = joel_jim_phil().await;
    let nodes = vec![
        document_with_content(1, 1, 100, "alpha"),
        document_with_content(2, 1, 100, "beta"),
        document_with_content(3, 1, 101, "gamma"),
        document_with_content(4, 1, 101, "delta"),
    ];
    for id in 1..=4 {
        harness.client.put_content(id, "hello world");
    }
    harness.client.add_updates(1, 5_000, nodes);

    // Metadata, then content once the metadata is committed
    harness.run_cycles(2).await;

    let joel = harness.search_as("world", "joel");
    let jim = harness.search_as("world", "jim");
    assert_eq!(dbids(&joel), BTreeSet::from([1, 2]));
    assert_eq!(dbids(&jim), BTreeSet::from([3, 4]));
    assert!(dbids(&joel).is_disjoint(&dbids(&jim)));
    assert_eq!(harness.search_as("world", "phil").len(), 4);
    assert!(harness.search_as("world", "nobody").is_empty());
    assert_eq!(harness.durable_marker(TrackerKind::Metadata), 1);
}

#[tokio::test]
async fn test_denied_reader_loses_access() {
    let harness = joel_jim_phil().await;
    harness
        .client
        .add_updates(1, 5_000, vec![document_with_content(1, 1, 100, "alpha")]);
    harness.client.put_content(1, "hello world");
    harness.run_cycles(2).await;
    assert_eq!(harness.search_as("world", "phil").len(), 1);

    // A later change set redefines ACL 100 and denies phil
    harness.client.add_acl_change_set(
        AclChangeSet::new(2, 6_000, 1),
        vec![tracker_types::AclReaders::new(100, ["joel", "phil"], ["phil"])],
    );
    harness.run_cycle().await.unwrap();

    assert!(harness.search_as("world", "phil").is_empty());
    assert_eq!(harness.search_as("world", "joel").len(), 1);
    assert_eq!(harness.durable_marker(TrackerKind::Acl), 2);
}
