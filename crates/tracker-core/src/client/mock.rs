//! In-memory repository for testing.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use tracker_types::{
    Acl, AclChangeSet, AclReaders, DictionaryModel, Node, NodeMetaData, Transaction,
};

use super::RepositoryClient;
use crate::error::RepositoryError;

#[derive(Default)]
struct Log {
    transactions: BTreeMap<u64, (Transaction, Vec<Node>)>,
    metadata: HashMap<u64, NodeMetaData>,
    change_sets: BTreeMap<u64, (AclChangeSet, Vec<AclReaders>)>,
    models: Vec<DictionaryModel>,
    content: HashMap<u64, String>,
    failing_nodes: HashSet<u64>,
    failing_transactions: HashSet<u64>,
    failing_content: HashSet<u64>,
    metadata_requests: Vec<usize>,
}

/// Repository client serving a change log held in memory.
///
/// Failures can be injected per node (entity failures), per transaction
/// (protocol failures) or globally (the repository is unavailable).
pub struct MockRepositoryClient {
    log: Mutex<Log>,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
    calls: AtomicUsize,
}

impl MockRepositoryClient {
    pub fn new() -> Self {
        Self {
            log: Mutex::new(Log::default()),
            unavailable: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    fn log(&self) -> MutexGuard<'_, Log> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a transaction and the nodes it touched.
    pub fn add_transaction(&self, transaction: Transaction, nodes: Vec<Node>) {
        self.log()
            .transactions
            .insert(transaction.id, (transaction, nodes));
    }

    /// Append a transaction updating the given nodes and publish their metadata.
    pub fn add_updates(&self, transaction_id: u64, commit_time_ms: u64, nodes: Vec<NodeMetaData>) {
        let transaction = Transaction::new(transaction_id, commit_time_ms, nodes.len(), 0);
        let touched = nodes
            .iter()
            .map(|meta| Node {
                tenant: meta.tenant.clone(),
                ..Node::updated(meta.id, transaction_id, meta.acl_id)
            })
            .collect();
        let mut log = self.log();
        for meta in nodes {
            log.metadata.insert(
                meta.id,
                NodeMetaData {
                    transaction_id,
                    ..meta
                },
            );
        }
        log.transactions
            .insert(transaction_id, (transaction, touched));
    }

    /// Append a transaction deleting the given nodes.
    pub fn add_deletes(&self, transaction_id: u64, commit_time_ms: u64, node_ids: &[u64]) {
        let transaction = Transaction::new(transaction_id, commit_time_ms, 0, node_ids.len());
        let mut log = self.log();
        let touched = node_ids
            .iter()
            .map(|id| {
                let acl_id = log.metadata.remove(id).map(|m| m.acl_id).unwrap_or(0);
                Node::deleted(*id, transaction_id, acl_id)
            })
            .collect();
        log.transactions
            .insert(transaction_id, (transaction, touched));
    }

    /// Publish (or replace) the metadata of a node without a new transaction.
    pub fn put_metadata(&self, meta: NodeMetaData) {
        self.log().metadata.insert(meta.id, meta);
    }

    pub fn add_acl_change_set(&self, change_set: AclChangeSet, readers: Vec<AclReaders>) {
        self.log()
            .change_sets
            .insert(change_set.id, (change_set, readers));
    }

    pub fn add_model(&self, model: DictionaryModel) {
        self.log().models.push(model);
    }

    pub fn put_content(&self, node_id: u64, text: impl Into<String>) {
        self.log().content.insert(node_id, text.into());
    }

    /// Make metadata retrieval for a node fail until healed.
    pub fn fail_node(&self, node_id: u64) {
        self.log().failing_nodes.insert(node_id);
    }

    pub fn heal_node(&self, node_id: u64) {
        self.log().failing_nodes.remove(&node_id);
    }

    /// Make node listing for a transaction fail with a protocol error.
    pub fn fail_transaction(&self, transaction_id: u64) {
        self.log().failing_transactions.insert(transaction_id);
    }

    pub fn heal_transaction(&self, transaction_id: u64) {
        self.log().failing_transactions.remove(&transaction_id);
    }

    /// Make content retrieval for a node fail with an entity error.
    pub fn fail_content(&self, node_id: u64) {
        self.log().failing_content.insert(node_id);
    }

    /// Make every call fail with a transient error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every call by the given duration.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Total number of calls served.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Sizes of every metadata request received, in order.
    pub fn metadata_request_sizes(&self) -> Vec<usize> {
        self.log().metadata_requests.clone()
    }

    async fn enter(&self) -> Result<(), RepositoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable(
                "repository is not reachable".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for MockRepositoryClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RepositoryClient for MockRepositoryClient {
    async fn get_transactions(
        &self,
        from_id: u64,
        limit: usize,
    ) -> Result<Vec<Transaction>, RepositoryError> {
        self.enter().await?;
        Ok(self
            .log()
            .transactions
            .range(from_id..)
            .take(limit)
            .map(|(_, (tx, _))| tx.clone())
            .collect())
    }

    async fn get_nodes(&self, transaction_id: u64) -> Result<Vec<Node>, RepositoryError> {
        self.enter().await?;
        let log = self.log();
        if log.failing_transactions.contains(&transaction_id) {
            return Err(RepositoryError::Protocol(format!(
                "malformed node listing for transaction {}",
                transaction_id
            )));
        }
        Ok(log
            .transactions
            .get(&transaction_id)
            .map(|(_, nodes)| nodes.clone())
            .unwrap_or_default())
    }

    async fn get_node_metadata(
        &self,
        node_ids: &[u64],
    ) -> Result<Vec<NodeMetaData>, RepositoryError> {
        self.enter().await?;
        let mut log = self.log();
        log.metadata_requests.push(node_ids.len());
        if let Some(id) = node_ids.iter().find(|id| log.failing_nodes.contains(*id)) {
            return Err(RepositoryError::Entity {
                id: *id,
                reason: "metadata could not be serialized".to_string(),
            });
        }
        Ok(node_ids
            .iter()
            .filter_map(|id| log.metadata.get(id).cloned())
            .collect())
    }

    async fn get_acl_change_sets(
        &self,
        from_id: u64,
        limit: usize,
    ) -> Result<Vec<AclChangeSet>, RepositoryError> {
        self.enter().await?;
        Ok(self
            .log()
            .change_sets
            .range(from_id..)
            .take(limit)
            .map(|(_, (cs, _))| cs.clone())
            .collect())
    }

    async fn get_acls(&self, change_set_ids: &[u64]) -> Result<Vec<Acl>, RepositoryError> {
        self.enter().await?;
        let log = self.log();
        Ok(change_set_ids
            .iter()
            .filter_map(|id| log.change_sets.get(id))
            .flat_map(|(cs, readers)| readers.iter().map(|r| Acl::new(cs.id, r.acl_id)))
            .collect())
    }

    async fn get_acl_readers(&self, acl_ids: &[u64]) -> Result<Vec<AclReaders>, RepositoryError> {
        self.enter().await?;
        let log = self.log();
        let mut latest: HashMap<u64, AclReaders> = HashMap::new();
        // Later change sets redefine earlier ACLs
        for (_, readers) in log.change_sets.values() {
            for r in readers.iter().filter(|r| acl_ids.contains(&r.acl_id)) {
                latest.insert(r.acl_id, r.clone());
            }
        }
        Ok(acl_ids.iter().filter_map(|id| latest.remove(id)).collect())
    }

    async fn get_models(
        &self,
        since_timestamp_ms: u64,
    ) -> Result<Vec<DictionaryModel>, RepositoryError> {
        self.enter().await?;
        let mut models: Vec<_> = self
            .log()
            .models
            .iter()
            .filter(|m| m.timestamp_ms > since_timestamp_ms)
            .cloned()
            .collect();
        models.sort_by_key(|m| m.timestamp_ms);
        Ok(models)
    }

    async fn get_text_content(&self, node_id: u64) -> Result<Option<String>, RepositoryError> {
        self.enter().await?;
        let log = self.log();
        if log.failing_content.contains(&node_id) {
            return Err(RepositoryError::Entity {
                id: node_id,
                reason: "content transformation failed".to_string(),
            });
        }
        Ok(log.content.get(&node_id).cloned())
    }
}
