//! Tracker identity and progress state.
//!
//! Every tracker owns one [`TrackerState`]. Log-driven trackers persist the
//! high-water mark of their state as a singleton index document keyed by
//! [`TrackerKind::state_key`], enabling resume after restart or rollback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TrackerTypesError;

/// The kinds of tracker bound to an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerKind {
    Model,
    Acl,
    Metadata,
    Content,
    Cascade,
    Commit,
}

impl TrackerKind {
    pub const ALL: [TrackerKind; 6] = [
        TrackerKind::Model,
        TrackerKind::Acl,
        TrackerKind::Metadata,
        TrackerKind::Content,
        TrackerKind::Cascade,
        TrackerKind::Commit,
    ];

    /// Key of the persisted state document, for trackers that persist one.
    pub fn state_key(&self) -> Option<&'static str> {
        match self {
            TrackerKind::Acl => Some("TRACKER!STATE!ACLTX"),
            TrackerKind::Metadata => Some("TRACKER!STATE!TX"),
            TrackerKind::Model
            | TrackerKind::Content
            | TrackerKind::Cascade
            | TrackerKind::Commit => None,
        }
    }

    /// Tag used to build scheduler job names.
    pub fn class_name(&self) -> &'static str {
        match self {
            TrackerKind::Model => "ModelTracker",
            TrackerKind::Acl => "AclTracker",
            TrackerKind::Metadata => "MetadataTracker",
            TrackerKind::Content => "ContentTracker",
            TrackerKind::Cascade => "CascadeTracker",
            TrackerKind::Commit => "CommitTracker",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerKind::Model => "model",
            TrackerKind::Acl => "acl",
            TrackerKind::Metadata => "metadata",
            TrackerKind::Content => "content",
            TrackerKind::Cascade => "cascade",
            TrackerKind::Commit => "commit",
        }
    }
}

impl std::fmt::Display for TrackerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress marker and counters of one tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerState {
    /// Highest log id applied (the high-water mark)
    pub last_indexed_id: u64,

    /// Commit time of the entry at the high-water mark (milliseconds)
    pub last_indexed_commit_time_ms: u64,

    /// Highest log id the repository reported during the last cycle
    pub last_id_on_server: u64,

    /// Number of cycles run since the state was loaded
    pub cycle_count: u64,

    /// When the last failed cycle ended
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_error_timestamp: Option<DateTime<Utc>>,

    /// Whether a cycle is executing
    #[serde(default)]
    pub running: bool,

    /// Whether the tracker asked for the current cycle's writes to be discarded
    #[serde(default)]
    pub in_rollback: bool,
}

impl TrackerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a state resuming from a durable marker.
    pub fn with_marker(last_indexed_id: u64, commit_time_ms: u64) -> Self {
        Self {
            last_indexed_id,
            last_indexed_commit_time_ms: commit_time_ms,
            last_id_on_server: last_indexed_id,
            ..Self::default()
        }
    }

    /// Advance the high-water mark.
    ///
    /// The marker never moves backwards; an id at or below the current
    /// marker leaves the state untouched and returns `false`.
    pub fn advance(&mut self, id: u64, commit_time_ms: u64) -> bool {
        if id <= self.last_indexed_id && self.last_indexed_id != 0 {
            return false;
        }
        self.last_indexed_id = id;
        self.last_indexed_commit_time_ms = commit_time_ms;
        if id > self.last_id_on_server {
            self.last_id_on_server = id;
        }
        true
    }

    /// First log id not yet applied.
    pub fn next_id(&self) -> u64 {
        self.last_indexed_id + 1
    }

    pub fn record_error(&mut self) {
        self.last_error_timestamp = Some(Utc::now());
    }

    /// Serialize to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, TrackerTypesError> {
        serde_json::to_vec(self).map_err(TrackerTypesError::from)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TrackerTypesError> {
        serde_json::from_slice(bytes).map_err(TrackerTypesError::from)
    }
}
