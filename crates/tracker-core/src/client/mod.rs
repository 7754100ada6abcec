//! Repository change-log client.
//!
//! Trackers pull every change through [`RepositoryClient`]. The wire
//! protocol lives behind the trait; [`MockRepositoryClient`] serves an
//! in-memory log for tests and local runs.

mod mock;

pub use mock::MockRepositoryClient;

use async_trait::async_trait;

use tracker_types::{Acl, AclChangeSet, AclReaders, DictionaryModel, Node, NodeMetaData, Transaction};

use crate::error::RepositoryError;

/// Read access to the repository's change logs.
///
/// Every listing is returned in ascending id order.
#[async_trait]
pub trait RepositoryClient: Send + Sync {
    /// Up to `limit` transactions with `id >= from_id`.
    async fn get_transactions(
        &self,
        from_id: u64,
        limit: usize,
    ) -> Result<Vec<Transaction>, RepositoryError>;

    /// Nodes touched by a transaction.
    async fn get_nodes(&self, transaction_id: u64) -> Result<Vec<Node>, RepositoryError>;

    /// Metadata of the given nodes.
    ///
    /// Nodes unknown to the repository are absent from the result. A
    /// `RepositoryError::Entity` means one of the nodes could not be
    /// serialized; callers retry node by node to isolate it.
    async fn get_node_metadata(
        &self,
        node_ids: &[u64],
    ) -> Result<Vec<NodeMetaData>, RepositoryError>;

    /// Up to `limit` ACL change sets with `id >= from_id`.
    async fn get_acl_change_sets(
        &self,
        from_id: u64,
        limit: usize,
    ) -> Result<Vec<AclChangeSet>, RepositoryError>;

    /// ACLs owned by the given change sets.
    async fn get_acls(&self, change_set_ids: &[u64]) -> Result<Vec<Acl>, RepositoryError>;

    /// Resolved readers of the given ACLs.
    async fn get_acl_readers(&self, acl_ids: &[u64]) -> Result<Vec<AclReaders>, RepositoryError>;

    /// Models changed after `since_timestamp_ms`.
    async fn get_models(
        &self,
        since_timestamp_ms: u64,
    ) -> Result<Vec<DictionaryModel>, RepositoryError>;

    /// Extracted text of a node's content, if it has any.
    async fn get_text_content(&self, node_id: u64) -> Result<Option<String>, RepositoryError>;
}
