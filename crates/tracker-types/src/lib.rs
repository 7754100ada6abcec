//! # tracker-types
//!
//! Shared domain types for the repository tracking subsystem.
//!
//! This crate defines the data structures exchanged between the trackers,
//! the repository client and the index facade:
//! - Change-log entries: transactions, nodes, ACL change sets, models
//! - Tracker identity and persisted progress state
//! - Settings: layered configuration for trackers and their schedules
//!
//! ## Usage
//!
//! ```rust
//! use tracker_types::{TrackerKind, TrackerState};
//!
//! let state = TrackerState::default();
//! assert_eq!(state.last_indexed_id, 0);
//! assert_eq!(TrackerKind::Metadata.state_key(), Some("TRACKER!STATE!TX"));
//! ```

pub mod acl;
pub mod config;
pub mod error;
pub mod model;
pub mod node;
pub mod state;

pub use acl::{Acl, AclChangeSet, AclReaders};
pub use config::{BatchSettings, CronSettings, TrackerSettings, DEFAULT_CRON};
pub use error::TrackerTypesError;
pub use model::{DataType, DictionaryModel, PropertyDefinition};
pub use node::{
    Node, NodeMetaData, NodeRef, NodeStatus, PropertyValue, QName, Transaction, CASCADE_PROPERTY,
    DEFAULT_TENANT,
};
pub use state::{TrackerKind, TrackerState};
