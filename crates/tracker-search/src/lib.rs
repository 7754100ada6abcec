//! # tracker-search
//!
//! Index writer/searcher facade for the repository trackers.
//!
//! Trackers never talk to Tantivy directly. They go through the
//! [`IndexFacade`] trait: add or replace a document, delete documents
//! matching a key, commit, roll back, and search by [`Predicate`].
//!
//! ## Features
//! - Embedded Tantivy index (MmapDirectory or RAM) behind [`TantivyIndex`]
//! - One fixed schema for node, ACL, transaction and state documents
//! - Uncommitted writes stay invisible to searches until `commit()`
//! - Authority-filtered search joining node documents to ACL documents

pub mod document;
pub mod error;
pub mod facade;
pub mod index;
pub mod schema;
pub mod searcher;

pub use document::{
    acl_doc_id, acl_tx_doc_id, node_doc_id, tx_doc_id, CascadeStatus, ContentStatus, DocType,
    IndexDocument,
};
pub use error::SearchError;
pub use facade::{DeleteKey, IndexFacade, Predicate};
pub use index::{IndexConfig, TantivyIndex};
pub use schema::{build_tracker_schema, TrackerSchema};
pub use searcher::{authorised_acl_ids, authorised_search};
