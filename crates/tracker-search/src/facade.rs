//! The writer/searcher facade trackers mutate the index through.

use crate::document::{CascadeStatus, ContentStatus, DocType, IndexDocument};
use crate::error::SearchError;

/// Selects the documents removed by [`IndexFacade::delete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteKey {
    /// The document with this primary key
    Id(String),
    /// Every document of this node (node or error stub)
    Dbid(u64),
    /// Every document written for this transaction, including its TX document
    Txid(u64),
    /// Every ACL document of this change set, including its ACLTX document
    AclTxId(u64),
    DocType(DocType),
}

/// Search predicate over indexed fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    All,
    Id(String),
    DocType(DocType),
    Tenant(String),
    Dbid(u64),
    Txid(u64),
    AclId(u64),
    AclTxId(u64),
    Reader(String),
    Denied(String),
    Ancestor(String),
    ContentStatus(ContentStatus),
    Cascade(CascadeStatus),
    /// Full-text query against the tokenized text field
    Text(String),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn and(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        Predicate::And(predicates.into_iter().collect())
    }

    pub fn or(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        Predicate::Or(predicates.into_iter().collect())
    }

    pub fn not(predicate: Predicate) -> Self {
        Predicate::Not(Box::new(predicate))
    }
}

/// Index writer/searcher used by every tracker.
///
/// Writes are buffered until `commit()`; searches only observe committed
/// documents. `rollback()` discards everything written since the last
/// commit. Callers coordinate commits through the commit tracker's lock
/// protocol rather than through this trait.
pub trait IndexFacade: Send + Sync {
    /// Add a document, replacing any document with the same id.
    fn add_or_update(&self, doc: &IndexDocument) -> Result<(), SearchError>;

    /// Delete every document matching the key.
    fn delete(&self, key: &DeleteKey) -> Result<(), SearchError>;

    /// Durably persist pending writes. Returns the commit opstamp.
    fn commit(&self) -> Result<u64, SearchError>;

    /// Discard pending writes. Returns the opstamp of the last commit.
    fn rollback(&self) -> Result<u64, SearchError>;

    /// Committed documents matching the predicate, ordered by id.
    fn search(&self, predicate: &Predicate, limit: usize)
        -> Result<Vec<IndexDocument>, SearchError>;

    /// Number of committed documents matching the predicate.
    fn count(&self, predicate: &Predicate) -> Result<usize, SearchError>;

    /// Fetch one committed document by primary key.
    fn get(&self, id: &str) -> Result<Option<IndexDocument>, SearchError> {
        Ok(self
            .search(&Predicate::Id(id.to_string()), 1)?
            .into_iter()
            .next())
    }
}
