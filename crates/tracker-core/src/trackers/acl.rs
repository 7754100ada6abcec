//! ACL change set tracker.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use tracker_search::{acl_doc_id, DeleteKey, IndexDocument, IndexFacade};
use tracker_types::{AclChangeSet, BatchSettings, TrackerKind, TrackerState};

use super::ModelTracker;
use crate::client::RepositoryClient;
use crate::error::TrackerError;
use crate::maintenance::{MaintenanceQueue, Operation, QueuedWork};
use crate::state_store;
use crate::tracker::{Tracker, TrackerBase};

/// Writes one ACL document per ACL of each change set, plus an ACLTX
/// document per change set.
pub struct AclTracker {
    base: TrackerBase,
    client: Arc<dyn RepositoryClient>,
    facade: Arc<dyn IndexFacade>,
    models: Arc<ModelTracker>,
    batch: BatchSettings,
    queue: MaintenanceQueue,
}

impl AclTracker {
    pub fn new(
        core: impl Into<String>,
        client: Arc<dyn RepositoryClient>,
        facade: Arc<dyn IndexFacade>,
        models: Arc<ModelTracker>,
        batch: BatchSettings,
    ) -> Self {
        Self {
            base: TrackerBase::new(core, TrackerKind::Acl),
            client,
            facade,
            models,
            batch,
            queue: MaintenanceQueue::new(),
        }
    }

    /// Queue maintenance on a container (`container`) or a single item.
    pub fn enqueue(&self, operation: Operation, container: bool, id: u64) {
        self.queue.push(operation, container, id);
    }

    pub fn add_change_set_to_purge(&self, id: u64) {
        self.queue.push(Operation::Purge, true, id);
    }

    pub fn add_change_set_to_reindex(&self, id: u64) {
        self.queue.push(Operation::Reindex, true, id);
    }

    pub fn add_change_set_to_index(&self, id: u64) {
        self.queue.push(Operation::Index, true, id);
    }

    pub fn add_acl_to_purge(&self, acl_id: u64) {
        self.queue.push(Operation::Purge, false, acl_id);
    }

    pub fn add_acl_to_reindex(&self, acl_id: u64) {
        self.queue.push(Operation::Reindex, false, acl_id);
    }

    pub fn add_acl_to_index(&self, acl_id: u64) {
        self.queue.push(Operation::Index, false, acl_id);
    }

    async fn index_change_set(&self, change_set: &AclChangeSet) -> Result<usize, TrackerError> {
        let acls = self.client.get_acls(&[change_set.id]).await?;
        let acl_ids: Vec<u64> = acls.iter().map(|a| a.acl_id).collect();

        let mut written = 0;
        for chunk in acl_ids.chunks(self.batch.acl_batch_size.max(1)) {
            for readers in self.client.get_acl_readers(chunk).await? {
                self.facade
                    .add_or_update(&IndexDocument::acl(&readers, change_set.id))?;
                written += 1;
            }
        }
        self.facade
            .add_or_update(&IndexDocument::acl_change_set(change_set))?;
        debug!(
            core = %self.base.core_name(),
            acl_change_set = change_set.id,
            acls = written,
            "Indexed ACL change set"
        );
        Ok(written)
    }

    async fn index_acl(&self, acl_id: u64) -> Result<(), TrackerError> {
        let change_set_id = self
            .facade
            .get(&acl_doc_id(acl_id))?
            .and_then(|doc| doc.acl_tx_id)
            .unwrap_or(0);
        for readers in self.client.get_acl_readers(&[acl_id]).await? {
            self.facade
                .add_or_update(&IndexDocument::acl(&readers, change_set_id))?;
        }
        Ok(())
    }

    async fn change_set(&self, id: u64) -> Result<Option<AclChangeSet>, TrackerError> {
        Ok(self
            .client
            .get_acl_change_sets(id, 1)
            .await?
            .into_iter()
            .find(|cs| cs.id == id))
    }

    async fn apply_work(&self, work: QueuedWork) -> Result<(), TrackerError> {
        match (work.operation, work.container) {
            (Operation::Purge, true) => {
                self.facade.delete(&DeleteKey::AclTxId(work.id))?;
            }
            (Operation::Purge, false) => {
                self.facade.delete(&DeleteKey::Id(acl_doc_id(work.id)))?;
            }
            (operation, true) => {
                if operation == Operation::Reindex {
                    self.facade.delete(&DeleteKey::AclTxId(work.id))?;
                }
                match self.change_set(work.id).await? {
                    Some(change_set) => {
                        self.index_change_set(&change_set).await?;
                    }
                    None => debug!(acl_change_set = work.id, "Change set not found in repository"),
                }
            }
            (operation, false) => {
                if operation == Operation::Reindex {
                    self.facade.delete(&DeleteKey::Id(acl_doc_id(work.id)))?;
                }
                self.index_acl(work.id).await?;
            }
        }
        Ok(())
    }

    async fn track_change_sets(&self) -> Result<(), TrackerError> {
        let start = self.base.current_state(|| self.load_state())?;
        let change_sets = self
            .client
            .get_acl_change_sets(start.next_id(), self.batch.acl_change_sets_per_cycle)
            .await?;
        if change_sets.is_empty() {
            debug!(core = %self.base.core_name(), from = start.next_id(), "No new ACL change sets");
            return Ok(());
        }

        let mut expected = start.last_indexed_id;
        let mut total = 0;
        for change_set in &change_sets {
            self.base.check_shutdown()?;
            let _write = self.base.write_lock().lock().await;

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
                total += self.index_change_set(change_set).await?;
                let state = self.base.update_state(|s| {
                    s.advance(change_set.id, change_set.commit_time_ms);
                    s.clone()
                })?;
                state_store::write_state(self.facade.as_ref(), TrackerKind::Acl, &state)
            }
            .await;
            self.base.guard(result)?;
            expected = change_set.id;
        }

        info!(
            core = %self.base.core_name(),
            change_sets = change_sets.len(),
            acls = total,
            marker = expected,
            "ACL tracker cycle done"
        );
        Ok(())
    }
}

#[async_trait]
impl Tracker for AclTracker {
    fn base(&self) -> &TrackerBase {
        &self.base
    }

    fn load_state(&self) -> Result<TrackerState, TrackerError> {
        state_store::load_state(self.facade.as_ref(), TrackerKind::Acl)
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
        self.track_change_sets().await
    }

    fn settle_maintenance(&self, committed: bool) {
        self.queue.settle(committed);
    }

    /// Caller holds this tracker's write lock.
    async fn maintenance(&self) -> Result<(), TrackerError> {
        for work in self.queue.drain() {
            info!(core = %self.base.core_name(), ?work, "Applying ACL maintenance");
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
    use crate::maintenance::{MaintenanceAction, Scope};
    use crate::testing::Fixture;
    use tracker_search::{acl_tx_doc_id, DocType, Predicate};
    use tracker_types::AclReaders;

    fn readers(acl_id: u64, reader: &str) -> AclReaders {
        AclReaders::new(acl_id, [reader], Vec::<String>::new())
    }

    #[tokio::test]
    async fn test_indexes_acls_and_change_set() {
        let fx = Fixture::new().await;
        fx.client.add_acl_change_set(
            AclChangeSet::new(1, 1_000, 2),
            vec![readers(100, "joel"), readers(101, "jim")],
        );

        fx.core.acl.track().await.unwrap();
        fx.core.commit.track().await.unwrap();

        assert_eq!(fx.count(&Predicate::DocType(DocType::Acl)), 2);
        let change_set = fx.facade.get(&acl_tx_doc_id(1)).unwrap().unwrap();
        assert_eq!(change_set.doc_type, DocType::AclChangeSet);
        let acl = fx.facade.get(&acl_doc_id(100)).unwrap().unwrap();
        assert_eq!(acl.readers, vec!["joel".to_string()]);
        assert_eq!(acl.acl_tx_id, Some(1));

        let durable = state_store::load_state(fx.facade.as_ref(), TrackerKind::Acl).unwrap();
        assert_eq!(durable.last_indexed_id, 1);
    }

    #[tokio::test]
    async fn test_later_change_set_redefines_acl() {
        let fx = Fixture::new().await;
        fx.client
            .add_acl_change_set(AclChangeSet::new(1, 1_000, 1), vec![readers(100, "joel")]);
        fx.cycle().await;

        fx.client
            .add_acl_change_set(AclChangeSet::new(2, 2_000, 1), vec![readers(100, "phil")]);
        fx.cycle().await;

        assert_eq!(fx.count(&Predicate::DocType(DocType::Acl)), 1);
        let acl = fx.facade.get(&acl_doc_id(100)).unwrap().unwrap();
        assert_eq!(acl.readers, vec!["phil".to_string()]);
        assert_eq!(acl.acl_tx_id, Some(2));
    }

    #[tokio::test]
    async fn test_small_acl_batches() {
        let mut batch = BatchSettings::default();
        batch.acl_batch_size = 1;
        let fx = Fixture::with_batch(batch).await;
        fx.client.add_acl_change_set(
            AclChangeSet::new(1, 1_000, 3),
            vec![readers(100, "a"), readers(101, "b"), readers(102, "c")],
        );

        fx.cycle().await;

        assert_eq!(fx.count(&Predicate::DocType(DocType::Acl)), 3);
    }

    #[tokio::test]
    async fn test_purge_and_reindex_change_set() {
        let fx = Fixture::new().await;
        fx.client.add_acl_change_set(
            AclChangeSet::new(1, 1_000, 2),
            vec![readers(100, "joel"), readers(101, "jim")],
        );
        fx.cycle().await;

        fx.core
            .apply(MaintenanceAction::Purge(Scope::AclChangeSet, 1))
            .unwrap();
        fx.cycle().await;
        assert_eq!(fx.count(&Predicate::DocType(DocType::Acl)), 0);
        assert!(fx.facade.get(&acl_tx_doc_id(1)).unwrap().is_none());

        fx.core
            .apply(MaintenanceAction::Reindex(Scope::AclChangeSet, 1))
            .unwrap();
        fx.cycle().await;
        assert_eq!(fx.count(&Predicate::DocType(DocType::Acl)), 2);
        assert!(fx.facade.get(&acl_tx_doc_id(1)).unwrap().is_some());
    }
}
