//! Process-wide registry of the trackers bound to each core.
//!
//! The registry is an explicit service object: callers construct one and
//! share it by `Arc`. It also owns the single [`ModelTracker`] shared by
//! every core, created under its own lock so concurrent core start-ups
//! never build two.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::{debug, info};

use tracker_cache::{AccessMode, ContentCache};
use tracker_search::IndexFacade;
use tracker_types::{BatchSettings, TrackerKind, TrackerSettings};

use crate::client::RepositoryClient;
use crate::error::TrackerError;
use crate::maintenance::{MaintenanceAction, Operation};
use crate::tracker::Tracker;
use crate::trackers::{
    AclTracker, CascadeTracker, CommitTracker, ContentTracker, MetadataTracker, ModelTracker,
};

/// The trackers of one core, wired around a shared index and cache.
pub struct CoreTrackers {
    core: String,
    pub acl: Arc<AclTracker>,
    pub metadata: Arc<MetadataTracker>,
    pub content: Arc<ContentTracker>,
    pub cascade: Option<Arc<CascadeTracker>>,
    pub commit: Arc<CommitTracker>,
}

impl CoreTrackers {
    pub fn builder(
        core: impl Into<String>,
        client: Arc<dyn RepositoryClient>,
        facade: Arc<dyn IndexFacade>,
        cache: Arc<ContentCache>,
        models: Arc<ModelTracker>,
    ) -> CoreTrackersBuilder {
        CoreTrackersBuilder {
            core: core.into(),
            client,
            facade,
            cache,
            models,
            batch: BatchSettings::default(),
            commit_interval: Duration::from_millis(TrackerSettings::default().commit_interval_ms),
            cascade_enabled: true,
        }
    }

    pub fn core_name(&self) -> &str {
        &self.core
    }

    /// Every tracker of the core, commit tracker last.
    pub fn all(&self) -> Vec<Arc<dyn Tracker>> {
        let mut trackers: Vec<Arc<dyn Tracker>> = vec![
            self.acl.clone(),
            self.metadata.clone(),
            self.content.clone(),
        ];
        if let Some(cascade) = &self.cascade {
            trackers.push(cascade.clone());
        }
        trackers.push(self.commit.clone());
        trackers
    }

    pub fn get(&self, kind: TrackerKind) -> Option<Arc<dyn Tracker>> {
        self.all().into_iter().find(|t| t.kind() == kind)
    }

    /// Queue a maintenance action on the owning tracker.
    ///
    /// Work is applied by the next commit tracker cycle.
    pub fn apply(&self, action: MaintenanceAction) -> Result<(), TrackerError> {
        info!(core = %self.core, ?action, "Maintenance requested");
        let (operation, scope, id) = match action {
            MaintenanceAction::Retry => {
                self.metadata.retry_error_nodes()?;
                return Ok(());
            }
            MaintenanceAction::Purge(scope, id) => (Operation::Purge, scope, id),
            MaintenanceAction::Reindex(scope, id) => (Operation::Reindex, scope, id),
            MaintenanceAction::Index(scope, id) => (Operation::Index, scope, id),
        };
        if scope.is_acl() {
            self.acl.enqueue(operation, scope.is_container(), id);
        } else {
            self.metadata.enqueue(operation, scope.is_container(), id);
        }
        Ok(())
    }

    pub fn shutdown(&self) {
        for tracker in self.all() {
            tracker.shutdown();
        }
    }
}

/// Builder for [`CoreTrackers`].
pub struct CoreTrackersBuilder {
    core: String,
    client: Arc<dyn RepositoryClient>,
    facade: Arc<dyn IndexFacade>,
    cache: Arc<ContentCache>,
    models: Arc<ModelTracker>,
    batch: BatchSettings,
    commit_interval: Duration,
    cascade_enabled: bool,
}

impl CoreTrackersBuilder {
    /// Take batch sizes, commit interval and cascade switch from settings.
    pub fn with_settings(mut self, settings: &TrackerSettings) -> Self {
        self.batch = settings.batch.clone();
        self.commit_interval = Duration::from_millis(settings.commit_interval_ms);
        self.cascade_enabled = settings.cascade_enabled;
        self
    }

    pub fn with_batch(mut self, batch: BatchSettings) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_commit_interval(mut self, interval: Duration) -> Self {
        self.commit_interval = interval;
        self
    }

    pub fn with_cascade(mut self, enabled: bool) -> Self {
        self.cascade_enabled = enabled;
        self
    }

    /// Wire the trackers. A cache without an access mode becomes read-write.
    pub fn build(self) -> Result<CoreTrackers, TrackerError> {
        if self.cache.access_mode()? == AccessMode::NotSet {
            self.cache.toggle_read_only(false)?;
        }

        let acl = Arc::new(AclTracker::new(
            self.core.clone(),
            self.client.clone(),
            self.facade.clone(),
            self.models.clone(),
            self.batch.clone(),
        ));
        let metadata = Arc::new(MetadataTracker::new(
            self.core.clone(),
            self.client.clone(),
            self.facade.clone(),
            self.cache.clone(),
            self.models.clone(),
            self.batch.clone(),
        ));
        let content = Arc::new(ContentTracker::new(
            self.core.clone(),
            self.client.clone(),
            self.facade.clone(),
            self.cache.clone(),
            self.models.clone(),
            self.batch.clone(),
        ));
        let cascade = self.cascade_enabled.then(|| {
            Arc::new(CascadeTracker::new(
                self.core.clone(),
                self.client.clone(),
                self.facade.clone(),
                self.cache.clone(),
                self.models.clone(),
                self.batch.clone(),
            ))
        });
        let commit = Arc::new(CommitTracker::new(
            self.core.clone(),
            self.facade.clone(),
            self.cache.clone(),
            acl.clone(),
            metadata.clone(),
            content.clone(),
            cascade.clone(),
            self.commit_interval,
        ));

        Ok(CoreTrackers {
            core: self.core,
            acl,
            metadata,
            content,
            cascade,
            commit,
        })
    }
}

/// Registry of trackers by core name.
pub struct TrackerRegistry {
    trackers: RwLock<HashMap<String, Vec<Arc<dyn Tracker>>>>,
    cores: RwLock<HashMap<String, Arc<CoreTrackers>>>,
    model_tracker: RwLock<Option<Arc<ModelTracker>>>,
    model_lock: tokio::sync::Mutex<()>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self {
            trackers: RwLock::new(HashMap::new()),
            cores: RwLock::new(HashMap::new()),
            model_tracker: RwLock::new(None),
            model_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Bind a tracker to a core.
    pub fn register(&self, core: &str, tracker: Arc<dyn Tracker>) {
        debug!(core, tracker = %tracker.kind(), "Registering tracker");
        self.trackers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(core.to_string())
            .or_default()
            .push(tracker);
    }

    /// Bind every tracker of a core and remember the core for maintenance.
    pub fn register_core(&self, core: Arc<CoreTrackers>) {
        for tracker in core.all() {
            self.register(core.core_name(), tracker);
        }
        info!(core = %core.core_name(), "Registered core trackers");
        self.cores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(core.core_name().to_string(), core);
    }

    pub fn get_trackers_for_core(&self, core: &str) -> Vec<Arc<dyn Tracker>> {
        self.trackers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(core)
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_trackers_for_core(&self, core: &str) -> bool {
        self.trackers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(core)
            .is_some_and(|t| !t.is_empty())
    }

    /// Unbind a core. Returns the trackers that were bound to it.
    pub fn remove_trackers_for_core(&self, core: &str) -> Vec<Arc<dyn Tracker>> {
        self.cores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(core);
        let removed = self
            .trackers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(core)
            .unwrap_or_default();
        info!(core, count = removed.len(), "Removed core trackers");
        removed
    }

    pub fn core(&self, core: &str) -> Option<Arc<CoreTrackers>> {
        self.cores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(core)
            .cloned()
    }

    pub fn core_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .trackers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn get_model_tracker(&self) -> Option<Arc<ModelTracker>> {
        self.model_tracker
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_model_tracker(&self, tracker: Arc<ModelTracker>) {
        *self
            .model_tracker
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(tracker);
    }

    /// Return the shared model tracker, creating it and running the first
    /// model sync if needed.
    ///
    /// Runs as one critical section so concurrent callers share a single
    /// instance and a single first sync.
    pub async fn ensure_model_tracker(
        &self,
        client: Arc<dyn RepositoryClient>,
    ) -> Result<Arc<ModelTracker>, TrackerError> {
        let _guard = self.model_lock.lock().await;
        let tracker = match self.get_model_tracker() {
            Some(tracker) => tracker,
            None => {
                let tracker = Arc::new(ModelTracker::new(client));
                self.set_model_tracker(tracker.clone());
                info!("Created shared model tracker");
                tracker
            }
        };
        tracker.ensure_first_model_sync().await?;
        Ok(tracker)
    }
}

impl Default for TrackerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
