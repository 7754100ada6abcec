//! Commit coordination.
//!
//! The commit tracker is the only component that commits or rolls back the
//! index. It takes the write lock of every data tracker in
//! [`COMMIT_LOCK_ORDER`], so no tracker is halfway through a batch while it
//! decides, then releases them in reverse order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use tracker_cache::{AccessMode, ContentCache};
use tracker_search::IndexFacade;
use tracker_types::TrackerKind;

use super::{AclTracker, CascadeTracker, ContentTracker, MetadataTracker};
use crate::error::TrackerError;
use crate::tracker::{Tracker, TrackerBase};

/// Order in which the commit tracker takes the trackers' write locks.
///
/// Content runs longest so it is locked first; ACL runs shortest so it is
/// locked last and held the least. Trackers only ever hold their own lock,
/// so a single global order rules out deadlock.
pub const COMMIT_LOCK_ORDER: [TrackerKind; 4] = [
    TrackerKind::Cascade,
    TrackerKind::Content,
    TrackerKind::Metadata,
    TrackerKind::Acl,
];

pub struct CommitTracker {
    base: TrackerBase,
    facade: Arc<dyn IndexFacade>,
    cache: Arc<ContentCache>,
    acl: Arc<AclTracker>,
    metadata: Arc<MetadataTracker>,
    content: Arc<ContentTracker>,
    cascade: Option<Arc<CascadeTracker>>,
    commit_interval: Duration,
    last_commit: Mutex<Option<Instant>>,
    commit_count: AtomicU64,
    rollback_count: AtomicU64,
}

impl CommitTracker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        core: impl Into<String>,
        facade: Arc<dyn IndexFacade>,
        cache: Arc<ContentCache>,
        acl: Arc<AclTracker>,
        metadata: Arc<MetadataTracker>,
        content: Arc<ContentTracker>,
        cascade: Option<Arc<CascadeTracker>>,
        commit_interval: Duration,
    ) -> Self {
        Self {
            base: TrackerBase::new(core, TrackerKind::Commit),
            facade,
            cache,
            acl,
            metadata,
            content,
            cascade,
            commit_interval,
            last_commit: Mutex::new(None),
            commit_count: AtomicU64::new(0),
            rollback_count: AtomicU64::new(0),
        }
    }

    fn tracker_for(&self, kind: TrackerKind) -> Option<&dyn Tracker> {
        match kind {
            TrackerKind::Cascade => self.cascade.as_deref().map(|t| t as &dyn Tracker),
            TrackerKind::Content => Some(self.content.as_ref() as &dyn Tracker),
            TrackerKind::Metadata => Some(self.metadata.as_ref() as &dyn Tracker),
            TrackerKind::Acl => Some(self.acl.as_ref() as &dyn Tracker),
            TrackerKind::Model | TrackerKind::Commit => None,
        }
    }

    /// Data trackers in lock acquisition order.
    pub fn locked_trackers(&self) -> Vec<&dyn Tracker> {
        COMMIT_LOCK_ORDER
            .iter()
            .filter_map(|kind| self.tracker_for(*kind))
            .collect()
    }

    /// Kinds whose locks are taken, in order.
    pub fn lock_order(&self) -> Vec<TrackerKind> {
        self.locked_trackers().iter().map(|t| t.kind()).collect()
    }

    /// Number of rollbacks performed, for operators and tests.
    pub fn rollback_count(&self) -> u64 {
        self.rollback_count.load(Ordering::SeqCst)
    }

    pub fn commit_count(&self) -> u64 {
        self.commit_count.load(Ordering::SeqCst)
    }

    fn commit_due(&self) -> bool {
        match *self.last_commit.lock().unwrap_or_else(PoisonError::into_inner) {
            Some(at) => at.elapsed() >= self.commit_interval,
            None => true,
        }
    }

    fn rollback_requested(&self) -> bool {
        self.locked_trackers().iter().any(|t| t.is_in_rollback())
    }

    fn maintenance_pending(&self) -> bool {
        self.metadata.has_maintenance() || self.acl.has_maintenance()
    }

    fn settle_queued_maintenance(&self, committed: bool) {
        self.metadata.settle_maintenance(committed);
        self.acl.settle_maintenance(committed);
    }

    /// Discard uncommitted writes and make every tracker resume from its
    /// durable state. Caller holds all write locks.
    fn rollback(&self) {
        for tracker in self.locked_trackers() {
            if let Some(cause) = tracker.base().rollback_cause() {
                warn!(core = %self.base.core_name(), tracker = %tracker.kind(), %cause, "Rollback caused by tracker failure");
            }
        }
        match self.facade.rollback() {
            Ok(opstamp) => info!(core = %self.base.core_name(), opstamp, "Index rolled back"),
            Err(e) => error!(core = %self.base.core_name(), error = %e, "Rollback failed"),
        }
        self.settle_queued_maintenance(false);
        for tracker in self.locked_trackers() {
            tracker.set_rollback(false, None);
            tracker.invalidate_state();
        }
        self.rollback_count.fetch_add(1, Ordering::SeqCst);
    }

    async fn commit(&self) -> Result<(), TrackerError> {
        if self.maintenance_pending() {
            self.metadata.maintenance().await?;
            self.acl.maintenance().await?;
        }
        let opstamp = self.facade.commit()?;
        self.settle_queued_maintenance(true);
        if self.cache.access_mode()? == AccessMode::ReadWrite {
            if let Some(version) = self.cache.flush_change_set()? {
                debug!(core = %self.base.core_name(), version, "Flushed content cache change set");
            }
        }
        *self.last_commit.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        self.commit_count.fetch_add(1, Ordering::SeqCst);
        info!(core = %self.base.core_name(), opstamp, "Index committed");
        Ok(())
    }
}

#[async_trait]
impl Tracker for CommitTracker {
    fn base(&self) -> &TrackerBase {
        &self.base
    }

    fn has_maintenance(&self) -> bool {
        self.maintenance_pending()
    }

    async fn do_track(&self) -> Result<(), TrackerError> {
        if !self.commit_due() && !self.maintenance_pending() && !self.rollback_requested() {
            return Ok(());
        }

        let trackers = self.locked_trackers();
        let mut guards = Vec::with_capacity(trackers.len());
        for tracker in &trackers {
            guards.push(tracker.base().write_lock().lock().await);
        }

        let mut outcome = Ok(());
        if self.rollback_requested() {
            self.rollback();
        } else if let Err(e) = self.commit().await {
            if e.is_transient() {
                // Uncommitted writes stay pending for the next commit
                warn!(core = %self.base.core_name(), error = %e, "Commit deferred");
                self.settle_queued_maintenance(false);
                outcome = Err(e);
            } else {
                error!(core = %self.base.core_name(), error = %e, "Commit failed, rolling back");
                self.rollback();
            }
        }

        while let Some(guard) = guards.pop() {
            drop(guard);
        }
        outcome
    }
}
