//! Node transaction tracker.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info, warn};

use tracker_cache::ContentCache;
use tracker_search::{
    node_doc_id, tx_doc_id, CascadeStatus, DeleteKey, DocType, IndexDocument, IndexFacade,
    Predicate,
};
use tracker_types::{
    BatchSettings, Node, NodeMetaData, NodeStatus, TrackerKind, TrackerState, Transaction,
};

use super::{cache_document, node_document, ModelTracker};
use crate::client::RepositoryClient;
use crate::error::{RepositoryError, TrackerError};
use crate::maintenance::{MaintenanceQueue, Operation, QueuedWork};
use crate::state_store;
use crate::tracker::{Tracker, TrackerBase};

/// Upper bound on error stubs collected by one retry request.
const MAX_RETRY_STUBS: usize = 100_000;

/// Transaction id of an error stub whose node could not be read at all.
const UNKNOWN_TXID: u64 = 0;

/// Outcome of fetching metadata for one chunk of nodes.
enum Fetched {
    Indexed(NodeMetaData),
    Missing(u64),
    Failed(Node, String),
}

/// Indexes node transactions: one document per live node, deletions for
/// removed nodes, and an error stub for every node that cannot be indexed.
pub struct MetadataTracker {
    base: TrackerBase,
    client: Arc<dyn RepositoryClient>,
    facade: Arc<dyn IndexFacade>,
    cache: Arc<ContentCache>,
    models: Arc<ModelTracker>,
    batch: BatchSettings,
    queue: MaintenanceQueue,
}

impl MetadataTracker {
    pub fn new(
        core: impl Into<String>,
        client: Arc<dyn RepositoryClient>,
        facade: Arc<dyn IndexFacade>,
        cache: Arc<ContentCache>,
        models: Arc<ModelTracker>,
        batch: BatchSettings,
    ) -> Self {
        Self {
            base: TrackerBase::new(core, TrackerKind::Metadata),
            client,
            facade,
            cache,
            models,
            batch,
            queue: MaintenanceQueue::new(),
        }
    }

    /// Queue maintenance on a container (`container`) or a single item.
    pub fn enqueue(&self, operation: Operation, container: bool, id: u64) {
        self.queue.push(operation, container, id);
    }

    pub fn add_transaction_to_purge(&self, txid: u64) {
        self.queue.push(Operation::Purge, true, txid);
    }

    pub fn add_transaction_to_reindex(&self, txid: u64) {
        self.queue.push(Operation::Reindex, true, txid);
    }

    pub fn add_transaction_to_index(&self, txid: u64) {
        self.queue.push(Operation::Index, true, txid);
    }

    pub fn add_node_to_purge(&self, dbid: u64) {
        self.queue.push(Operation::Purge, false, dbid);
    }

    pub fn add_node_to_reindex(&self, dbid: u64) {
        self.queue.push(Operation::Reindex, false, dbid);
    }

    pub fn add_node_to_index(&self, dbid: u64) {
        self.queue.push(Operation::Index, false, dbid);
    }

    /// Queue a reindex of every transaction that left an error stub.
    ///
    /// Stubs written by node maintenance carry no transaction; their node
    /// is reindexed on its own. Returns the number of requests queued.
    pub fn retry_error_nodes(&self) -> Result<usize, TrackerError> {
        let stubs = self
            .facade
            .search(&Predicate::DocType(DocType::ErrorNode), MAX_RETRY_STUBS)?;
        if stubs.len() == MAX_RETRY_STUBS {
            warn!(
                core = %self.base.core_name(),
                limit = MAX_RETRY_STUBS,
                "Too many error nodes, retry again after the next commit for the rest"
            );
        }

        let mut txids = BTreeSet::new();
        let mut orphans = 0;
        for stub in &stubs {
            let Some(dbid) = stub.dbid else { continue };
            match stub.txid.filter(|txid| *txid != UNKNOWN_TXID) {
                Some(txid) => {
                    self.add_node_to_purge(dbid);
                    txids.insert(txid);
                }
                None => {
                    self.add_node_to_reindex(dbid);
                    orphans += 1;
                }
            }
        }
        for txid in &txids {
            self.add_transaction_to_reindex(*txid);
        }
        info!(
            core = %self.base.core_name(),
            stubs = stubs.len(),
            transactions = txids.len(),
            nodes = orphans,
            "Queued error nodes for retry"
        );
        Ok(txids.len() + orphans)
    }

    /// Fetch metadata for updated nodes, chunk by chunk.
    ///
    /// A chunk failing on one entity is retried node by node so only the
    /// bad node ends up as an error stub.
    async fn fetch_metadata(&self, nodes: &[Node]) -> Result<Vec<Fetched>, TrackerError> {
        let chunk_size = self.batch.node_batch_size.max(1);
        let chunks: Vec<Vec<Node>> = nodes.chunks(chunk_size).map(<[Node]>::to_vec).collect();
        let fetched: Vec<Vec<Fetched>> = stream::iter(chunks)
            .map(|chunk| self.fetch_chunk(chunk))
            .buffered(self.batch.parallelism.max(1))
            .try_collect()
            .await?;
        Ok(fetched.into_iter().flatten().collect())
    }

    async fn fetch_chunk(&self, chunk: Vec<Node>) -> Result<Vec<Fetched>, TrackerError> {
        let ids: Vec<u64> = chunk.iter().map(|n| n.id).collect();
        match self.client.get_node_metadata(&ids).await {
            Ok(found) => Ok(Self::match_chunk(chunk, found)),
            Err(RepositoryError::Entity { id, reason }) => {
                debug!(node = id, %reason, "Chunk failed, isolating nodes");
                let mut out = Vec::with_capacity(chunk.len());
                for node in chunk {
                    match self.client.get_node_metadata(&[node.id]).await {
                        Ok(found) => out.extend(Self::match_chunk(vec![node], found)),
                        Err(RepositoryError::Entity { reason, .. }) => {
                            out.push(Fetched::Failed(node, reason))
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Ok(out)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn match_chunk(chunk: Vec<Node>, found: Vec<NodeMetaData>) -> Vec<Fetched> {
        let mut found: std::collections::HashMap<u64, NodeMetaData> =
            found.into_iter().map(|m| (m.id, m)).collect();
        chunk
            .into_iter()
            .map(|node| match found.remove(&node.id) {
                Some(meta) => Fetched::Indexed(meta),
                None => Fetched::Missing(node.id),
            })
            .collect()
    }

    fn write_error_node(&self, node: &Node, txid: u64, reason: &str) -> Result<(), TrackerError> {
        warn!(
            core = %self.base.core_name(),
            node = node.id,
            txid,
            %reason,
            "Indexing error node"
        );
        let stub = IndexDocument::error_node(node.id, txid, node.acl_id, &node.tenant, reason);
        self.facade.add_or_update(&stub)?;
        Ok(())
    }

    fn delete_node(&self, node: &Node) -> Result<(), TrackerError> {
        self.facade.delete(&DeleteKey::Dbid(node.id))?;
        self.cache.remove(&node.tenant, node.id)?;
        Ok(())
    }

    /// Index the given nodes of a transaction. Returns whether any of them
    /// asked for a cascade.
    async fn index_nodes(&self, txid: u64, nodes: Vec<Node>) -> Result<bool, TrackerError> {
        let (deleted, updated): (Vec<Node>, Vec<Node>) = nodes
            .into_iter()
            .partition(|n| n.status == NodeStatus::Deleted);

        for node in &deleted {
            self.delete_node(node)?;
        }

        let mut cascade = false;
        for fetched in self.fetch_metadata(&updated).await? {
            match fetched {
                Fetched::Indexed(meta) => {
                    if let Err(reason) = self.models.validate(&meta) {
                        let node = Node {
                            tenant: meta.tenant.clone(),
                            ..Node::updated(meta.id, txid, meta.acl_id)
                        };
                        self.write_error_node(&node, txid, &reason)?;
                        continue;
                    }
                    let doc = node_document(&meta);
                    cascade |= doc.cascade == Some(CascadeStatus::Pending);
                    self.facade.add_or_update(&doc)?;
                    cache_document(&self.cache, &doc)?;
                }
                Fetched::Missing(dbid) => {
                    // Deleted again after this transaction
                    if let Some(node) = updated.iter().find(|n| n.id == dbid) {
                        self.delete_node(node)?;
                    }
                }
                Fetched::Failed(node, reason) => self.write_error_node(&node, txid, &reason)?,
            }
        }
        Ok(cascade)
    }

    /// Index every node of `tx` and queue its TX document.
    async fn index_transaction(&self, tx: &Transaction) -> Result<usize, TrackerError> {
        let nodes = self.client.get_nodes(tx.id).await?;
        let count = nodes.len();
        let cascade = self.index_nodes(tx.id, nodes).await?;

        let mut doc = IndexDocument::transaction(tx);
        doc.cascade = cascade.then_some(CascadeStatus::Pending);
        self.facade.add_or_update(&doc)?;
        debug!(core = %self.base.core_name(), txid = tx.id, nodes = count, cascade, "Indexed transaction");
        Ok(count)
    }

    fn purge_transaction(&self, txid: u64) -> Result<(), TrackerError> {
        self.facade.delete(&DeleteKey::Txid(txid))?;
        Ok(())
    }

    async fn transaction(&self, txid: u64) -> Result<Option<Transaction>, TrackerError> {
        Ok(self
            .client
            .get_transactions(txid, 1)
            .await?
            .into_iter()
            .find(|tx| tx.id == txid))
    }

    async fn index_single_node(&self, dbid: u64) -> Result<(), TrackerError> {
        let meta = self.client.get_node_metadata(&[dbid]).await;
        match meta {
            Ok(found) => match found.into_iter().next() {
                Some(meta) => {
                    let node = Node {
                        tenant: meta.tenant.clone(),
                        ..Node::updated(meta.id, meta.transaction_id, meta.acl_id)
                    };
                    self.index_nodes(meta.transaction_id, vec![node]).await?;
                }
                None => {
                    self.facade.delete(&DeleteKey::Dbid(dbid))?;
                }
            },
            Err(RepositoryError::Entity { reason, .. }) => {
                let existing = self.facade.get(&node_doc_id(dbid))?;
                let txid = existing.as_ref().and_then(|d| d.txid).unwrap_or(UNKNOWN_TXID);
                let acl_id = existing.as_ref().and_then(|d| d.acl_id).unwrap_or(0);
                self.write_error_node(&Node::updated(dbid, txid, acl_id), txid, &reason)?;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn apply_work(&self, work: QueuedWork) -> Result<(), TrackerError> {
        match (work.operation, work.container) {
            (Operation::Purge, true) => self.purge_transaction(work.id)?,
            (Operation::Purge, false) => {
                self.facade.delete(&DeleteKey::Dbid(work.id))?;
            }
            (operation, true) => {
                if operation == Operation::Reindex {
                    self.purge_transaction(work.id)?;
                }
                match self.transaction(work.id).await? {
                    Some(tx) => {
                        self.index_transaction(&tx).await?;
                    }
                    None => debug!(txid = work.id, "Transaction not found in repository"),
                }
            }
            (operation, false) => {
                if operation == Operation::Reindex {
                    self.facade.delete(&DeleteKey::Dbid(work.id))?;
                }
                self.index_single_node(work.id).await?;
            }
        }
        Ok(())
    }

    /// Index one page of transactions after the high-water mark.
    async fn track_transactions(&self) -> Result<(), TrackerError> {
        let start = self.base.current_state(|| self.load_state())?;
        let transactions = self
            .client
            .get_transactions(start.next_id(), self.batch.transactions_per_cycle)
            .await?;
        if transactions.is_empty() {
            debug!(core = %self.base.core_name(), from = start.next_id(), "No new transactions");
            return Ok(());
        }
        info!(
            core = %self.base.core_name(),
            count = transactions.len(),
            first = transactions[0].id,
            "Found transactions"
        );

        let mut expected = start.last_indexed_id;
        let mut indexed_nodes = 0;
        for tx in &transactions {
            self.base.check_shutdown()?;
            let _write = self.base.write_lock().lock().await;

            // A rollback while the lock was free moves the marker back
            let state = self.base.current_state(|| self.load_state())?;
            if state.last_indexed_id != expected {
                info!(
                    core = %self.base.core_name(),
                    marker = state.last_indexed_id,
                    "State reloaded mid-cycle, ending cycle"
                );
                return Ok(());
            }

            let result = async {
                if !tx.is_empty() {
                    indexed_nodes += self.index_transaction(tx).await?;
                }
                let state = self
                    .base
                    .update_state(|s| {
                        s.advance(tx.id, tx.commit_time_ms);
                        s.clone()
                    })?;
                state_store::write_state(self.facade.as_ref(), TrackerKind::Metadata, &state)
            }
            .await;
            self.base.guard(result)?;
            expected = tx.id;
        }

        info!(core = %self.base.core_name(), nodes = indexed_nodes, marker = expected, "Metadata tracker cycle done");
        Ok(())
    }
}

#[async_trait]
impl Tracker for MetadataTracker {
    fn base(&self) -> &TrackerBase {
        &self.base
    }

    fn load_state(&self) -> Result<TrackerState, TrackerError> {
        state_store::load_state(self.facade.as_ref(), TrackerKind::Metadata)
    }

    fn ready(&self) -> bool {
        self.models.has_models()
    }

    fn has_maintenance(&self) -> bool {
        !self.queue.is_empty()
    }

    fn on_disable(&self) {
        self.queue.clear();
    }

    async fn do_track(&self) -> Result<(), TrackerError> {
        self.track_transactions().await
    }

    fn settle_maintenance(&self, committed: bool) {
        self.queue.settle(committed);
    }

    /// Caller holds this tracker's write lock.
    async fn maintenance(&self) -> Result<(), TrackerError> {
        for work in self.queue.drain() {
            info!(core = %self.base.core_name(), ?work, "Applying metadata maintenance");
            if let Err(e) = self.apply_work(work).await {
                if !e.is_transient() {
                    warn!(core = %self.base.core_name(), ?work, error = %e, "Dropping failed maintenance request");
                    self.queue.discard(work);
                }
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maintenance::MaintenanceAction;
    use crate::testing::{named_node, Fixture};
    use tracker_types::PropertyValue;

    fn node_count(fx: &Fixture) -> usize {
        fx.count(&Predicate::DocType(DocType::Node))
    }

    fn error_count(fx: &Fixture) -> usize {
        fx.count(&Predicate::DocType(DocType::ErrorNode))
    }

    #[tokio::test]
    async fn test_indexes_transactions_and_advances_marker() {
        let fx = Fixture::new().await;
        fx.client.add_updates(
            1,
            1_000,
            vec![named_node(1, 1, 10, "a"), named_node(2, 1, 10, "b")],
        );
        fx.client.add_updates(2, 2_000, vec![named_node(3, 2, 10, "c")]);

        fx.core.metadata.track().await.unwrap();
        let state = fx.core.metadata.state_snapshot().unwrap();
        assert_eq!(state.last_indexed_id, 2);
        assert_eq!(state.last_indexed_commit_time_ms, 2_000);

        // Nothing is visible until the commit tracker commits
        assert_eq!(node_count(&fx), 0);
        fx.core.commit.track().await.unwrap();

        assert_eq!(node_count(&fx), 3);
        assert_eq!(fx.count(&Predicate::DocType(DocType::Transaction)), 2);
        let durable = state_store::load_state(fx.facade.as_ref(), TrackerKind::Metadata).unwrap();
        assert_eq!(durable.last_indexed_id, 2);
    }

    #[tokio::test]
    async fn test_failing_node_becomes_error_node() {
        let fx = Fixture::new().await;
        let nodes = (1..=5).map(|id| named_node(id, 1, 10, "doc")).collect();
        fx.client.add_updates(1, 1_000, nodes);
        fx.client.fail_node(3);

        fx.cycle().await;

        assert_eq!(node_count(&fx), 4);
        assert_eq!(error_count(&fx), 1);
        let stub = fx.facade.get(&node_doc_id(3)).unwrap().unwrap();
        assert_eq!(stub.doc_type, DocType::ErrorNode);
        assert_eq!(stub.txid, Some(1));
        assert!(!fx.core.metadata.is_in_rollback());
        // The marker moves past the transaction holding the error node
        assert_eq!(fx.core.metadata.state_snapshot().unwrap().last_indexed_id, 1);
        assert_eq!(fx.client.metadata_request_sizes(), vec![5, 1, 1, 1, 1, 1]);
    }

    #[tokio::test]
    async fn test_invalid_property_becomes_error_node() {
        let fx = Fixture::new().await;
        let bad = named_node(2, 1, 10, "bad").with_property("cm:size", PropertyValue::text("big"));
        fx.client
            .add_updates(1, 1_000, vec![named_node(1, 1, 10, "good"), bad]);

        fx.cycle().await;

        assert_eq!(node_count(&fx), 1);
        let stub = fx.facade.get(&node_doc_id(2)).unwrap().unwrap();
        assert_eq!(stub.doc_type, DocType::ErrorNode);
        assert!(stub.error.unwrap().contains("cm:size"));
    }

    #[tokio::test]
    async fn test_deleted_nodes_are_removed() {
        let fx = Fixture::new().await;
        fx.client.add_updates(
            1,
            1_000,
            vec![named_node(1, 1, 10, "a"), named_node(2, 1, 10, "b")],
        );
        fx.cycle().await;
        assert_eq!(node_count(&fx), 2);

        fx.client.add_deletes(2, 2_000, &[1]);
        fx.cycle().await;

        assert_eq!(node_count(&fx), 1);
        assert!(fx.facade.get(&node_doc_id(1)).unwrap().is_none());
        assert!(fx
            .cache
            .retrieve(tracker_types::DEFAULT_TENANT, 1)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_large_transaction_is_fetched_in_chunks() {
        let fx = Fixture::new().await;
        let nodes = (1..=120).map(|id| named_node(id, 1, 10, "bulk")).collect();
        fx.client.add_updates(1, 1_000, nodes);

        fx.cycle().await;

        assert_eq!(fx.client.metadata_request_sizes(), vec![50, 50, 20]);
        assert_eq!(node_count(&fx), 120);
    }

    #[tokio::test]
    async fn test_transient_failure_does_not_request_rollback() {
        let fx = Fixture::new().await;
        fx.client.add_updates(1, 1_000, vec![named_node(1, 1, 10, "a")]);
        fx.client.set_unavailable(true);

        let err = fx.core.metadata.track().await.unwrap_err();
        assert!(err.is_transient());
        assert!(!fx.core.metadata.is_in_rollback());

        fx.client.set_unavailable(false);
        fx.cycle().await;
        assert_eq!(node_count(&fx), 1);
    }

    #[tokio::test]
    async fn test_retry_reindexes_error_transactions() {
        let fx = Fixture::new().await;
        let nodes = (1..=3).map(|id| named_node(id, 1, 10, "doc")).collect();
        fx.client.add_updates(1, 1_000, nodes);
        fx.client.fail_node(2);
        fx.cycle().await;
        assert_eq!(error_count(&fx), 1);

        fx.client.heal_node(2);
        fx.core.apply(MaintenanceAction::Retry).unwrap();
        assert!(fx.core.metadata.has_maintenance());
        fx.cycle().await;

        assert_eq!(error_count(&fx), 0);
        assert_eq!(node_count(&fx), 3);
        assert!(!fx.core.metadata.has_maintenance());
    }

    #[tokio::test]
    async fn test_retry_recovers_node_indexed_by_maintenance() {
        let fx = Fixture::new().await;
        fx.client.add_updates(1, 1_000, vec![named_node(1, 1, 10, "a")]);
        fx.cycle().await;

        // Published without a transaction the tracker has seen
        fx.client.put_metadata(named_node(7, 4, 10, "late"));
        fx.client.fail_node(7);
        fx.core
            .apply(MaintenanceAction::Index(crate::maintenance::Scope::Node, 7))
            .unwrap();
        fx.cycle().await;

        let stub = fx.facade.get(&node_doc_id(7)).unwrap().unwrap();
        assert_eq!(stub.doc_type, DocType::ErrorNode);
        assert_eq!(stub.txid, Some(UNKNOWN_TXID));

        fx.client.heal_node(7);
        assert_eq!(fx.core.metadata.retry_error_nodes().unwrap(), 1);
        fx.cycle().await;

        let doc = fx.facade.get(&node_doc_id(7)).unwrap().unwrap();
        assert_eq!(doc.doc_type, DocType::Node);
        assert_eq!(error_count(&fx), 0);
        assert_eq!(node_count(&fx), 2);
    }

    #[tokio::test]
    async fn test_purge_transaction_removes_its_documents() {
        let fx = Fixture::new().await;
        fx.client.add_updates(1, 1_000, vec![named_node(1, 1, 10, "a")]);
        fx.client.add_updates(2, 2_000, vec![named_node(2, 2, 10, "b")]);
        fx.cycle().await;

        fx.core
            .apply(MaintenanceAction::Purge(crate::maintenance::Scope::Transaction, 1))
            .unwrap();
        fx.cycle().await;

        assert_eq!(node_count(&fx), 1);
        assert!(fx.facade.get(&tx_doc_id(1)).unwrap().is_none());
        assert!(fx.facade.get(&node_doc_id(2)).unwrap().is_some());
    }
}
