//! Cascade tracker.
//!
//! A node flagged for cascade (typically a folder rename or move) leaves
//! its transaction document marked pending. For every such transaction the
//! tracker refetches the metadata of all descendants of the flagged nodes
//! and rewrites their ancestors and paths, then marks the transaction done.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info};

use tracker_cache::ContentCache;
use tracker_search::{CascadeStatus, DocType, IndexDocument, IndexFacade, Predicate};
use tracker_types::{BatchSettings, NodeMetaData, TrackerKind};

use super::{cache_document, cached_document, restructure, ModelTracker};
use crate::client::RepositoryClient;
use crate::error::TrackerError;
use crate::tracker::{Tracker, TrackerBase};

/// Upper bound on nodes examined below one cascading node.
const MAX_DESCENDANTS: usize = 1_000_000;

pub struct CascadeTracker {
    base: TrackerBase,
    client: Arc<dyn RepositoryClient>,
    facade: Arc<dyn IndexFacade>,
    cache: Arc<ContentCache>,
    models: Arc<ModelTracker>,
    batch: BatchSettings,
}

impl CascadeTracker {
    pub fn new(
        core: impl Into<String>,
        client: Arc<dyn RepositoryClient>,
        facade: Arc<dyn IndexFacade>,
        cache: Arc<ContentCache>,
        models: Arc<ModelTracker>,
        batch: BatchSettings,
    ) -> Self {
        Self {
            base: TrackerBase::new(core, TrackerKind::Cascade),
            client,
            facade,
            cache,
            models,
            batch,
        }
    }

    fn pending_transactions(&self) -> Result<Vec<IndexDocument>, TrackerError> {
        let predicate = Predicate::and([
            Predicate::DocType(DocType::Transaction),
            Predicate::Cascade(CascadeStatus::Pending),
        ]);
        Ok(self
            .facade
            .search(&predicate, self.batch.cascade_transactions_per_cycle)?)
    }

    /// Current document of a node: the cache holds the freshest copy.
    fn current_document(&self, indexed: &IndexDocument) -> Result<IndexDocument, TrackerError> {
        match indexed.dbid {
            Some(dbid) => Ok(cached_document(&self.cache, &indexed.tenant, dbid)?
                .unwrap_or_else(|| indexed.clone())),
            None => Ok(indexed.clone()),
        }
    }

    async fn refresh_chunk(&self, chunk: Vec<IndexDocument>) -> Result<usize, TrackerError> {
        let ids: Vec<u64> = chunk.iter().filter_map(|d| d.dbid).collect();
        let fresh: HashMap<u64, NodeMetaData> = self
            .client
            .get_node_metadata(&ids)
            .await?
            .into_iter()
            .map(|m| (m.id, m))
            .collect();

        let mut refreshed = 0;
        for indexed in &chunk {
            let Some(meta) = indexed.dbid.and_then(|id| fresh.get(&id)) else {
                continue;
            };
            let existing = self.current_document(indexed)?;
            let doc = restructure(&existing, meta);
            self.facade.add_or_update(&doc)?;
            cache_document(&self.cache, &doc)?;
            refreshed += 1;
        }
        Ok(refreshed)
    }

    /// Re-derive every descendant of `node_ref`.
    async fn cascade_from(&self, node_ref: &str) -> Result<usize, TrackerError> {
        let descendants = self.facade.search(
            &Predicate::and([
                Predicate::DocType(DocType::Node),
                Predicate::Ancestor(node_ref.to_string()),
            ]),
            MAX_DESCENDANTS,
        )?;
        let chunks: Vec<Vec<IndexDocument>> = descendants
            .chunks(self.batch.cascade_node_batch_size.max(1))
            .map(<[IndexDocument]>::to_vec)
            .collect();
        let counts: Vec<usize> = stream::iter(chunks)
            .map(|chunk| self.refresh_chunk(chunk))
            .buffer_unordered(self.batch.parallelism.max(1))
            .try_collect()
            .await?;
        Ok(counts.into_iter().sum())
    }

    async fn cascade_transaction(&self, tx_doc: &IndexDocument) -> Result<usize, TrackerError> {
        let Some(txid) = tx_doc.txid else {
            return Ok(0);
        };
        let cascading = self.facade.search(
            &Predicate::and([
                Predicate::DocType(DocType::Node),
                Predicate::Txid(txid),
                Predicate::Cascade(CascadeStatus::Pending),
            ]),
            MAX_DESCENDANTS,
        )?;

        let mut refreshed = 0;
        for node in &cascading {
            if let Some(node_ref) = &node.node_ref {
                refreshed += self.cascade_from(node_ref).await?;
            }
            let mut done = self.current_document(node)?;
            if done.cascade == Some(CascadeStatus::Pending) {
                done.cascade = Some(CascadeStatus::Done);
                self.facade.add_or_update(&done)?;
                cache_document(&self.cache, &done)?;
            }
        }

        let mut tx_done = tx_doc.clone();
        tx_done.cascade = Some(CascadeStatus::Done);
        self.facade.add_or_update(&tx_done)?;
        debug!(core = %self.base.core_name(), txid, refreshed, "Cascaded transaction");
        Ok(refreshed)
    }
}

#[async_trait]
impl Tracker for CascadeTracker {
    fn base(&self) -> &TrackerBase {
        &self.base
    }

    fn ready(&self) -> bool {
        self.models.has_models()
    }

    async fn do_track(&self) -> Result<(), TrackerError> {
        let pending = self.pending_transactions()?;
        if pending.is_empty() {
            return Ok(());
        }

        let mut refreshed = 0;
        for tx_doc in &pending {
            self.base.check_shutdown()?;
            let _write = self.base.write_lock().lock().await;
            let result = self.cascade_transaction(tx_doc).await;
            refreshed += self.base.guard(result)?;
        }

        info!(
            core = %self.base.core_name(),
            transactions = pending.len(),
            refreshed,
            "Cascade tracker cycle done"
        );
        Ok(())
    }
}
