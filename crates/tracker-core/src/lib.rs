//! Change-log trackers that keep a search index in step with a repository.
//!
//! Each core (index) is served by one tracker of each kind. Trackers pull
//! transactions and ACL change sets from a [`RepositoryClient`], write
//! documents through an [`tracker_search::IndexFacade`], and persist their
//! high-water marks as state documents in the same index. The
//! [`CommitTracker`] is the only component that commits or rolls back, and
//! it does so while holding every other tracker's write lock in
//! [`COMMIT_LOCK_ORDER`].

pub mod client;
pub mod error;
pub mod maintenance;
pub mod registry;
pub mod run_lock;
pub mod state_store;
#[cfg(test)]
pub(crate) mod testing;
pub mod tracker;
pub mod trackers;

pub use client::{MockRepositoryClient, RepositoryClient};
pub use error::{RepositoryError, TrackerError};
pub use maintenance::{MaintenanceAction, MaintenanceQueue, Operation, QueuedWork, Scope};
pub use registry::{CoreTrackers, CoreTrackersBuilder, TrackerRegistry};
pub use run_lock::{RunGuard, RunLock};
pub use tracker::{Tracker, TrackerBase};
pub use trackers::{
    AclTracker, CascadeTracker, CommitTracker, ContentTracker, MetadataTracker, ModelTracker,
    COMMIT_LOCK_ORDER, MODEL_TRACKER_CORE,
};
