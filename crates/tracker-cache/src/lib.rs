//! # tracker-cache
//!
//! On-disk cache of documents and binary payloads retrieved by the
//! trackers, keyed by `(tenant, id)`.
//!
//! Every mutation on a read-write cache is recorded in the current
//! [`ChangeSet`]. Flushing a change set assigns it a new version, so a
//! read-only replica can apply only the net changes since the last version
//! it saw (see [`sync_replica`]).
//!
//! ## Access modes
//!
//! A cache starts with no access mode. It must be toggled to read-only or
//! read-write before any mutation; once read-write it stays read-write.

pub mod changeset;
pub mod error;
pub mod replication;
pub mod store;

pub use changeset::{
    is_unknown_version, ChangeKind, ChangeRecord, ChangeSet, VersionRange, NO_VERSION_AVAILABLE,
};
pub use error::CacheError;
pub use replication::{sync_replica, SyncReport};
pub use store::{AccessMode, ContentCache};
