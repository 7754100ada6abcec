//! Tantivy-backed implementation of the index facade.
//!
//! Handles index creation/opening and maps [`Predicate`]s and
//! [`DeleteKey`]s onto Tantivy queries and terms.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tantivy::collector::{Count, TopDocs};
use tantivy::query::{AllQuery, BooleanQuery, EmptyQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::{debug, info, warn};

use crate::document::IndexDocument;
use crate::error::SearchError;
use crate::facade::{DeleteKey, IndexFacade, Predicate};
use crate::schema::{build_tracker_schema, TrackerSchema};

/// Default memory budget for IndexWriter (50MB)
const DEFAULT_WRITER_MEMORY_MB: usize = 50;

/// Index configuration
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Path to index directory
    pub index_path: PathBuf,
    /// Memory budget for writer in MB
    pub writer_memory_mb: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            index_path: PathBuf::from("./index"),
            writer_memory_mb: DEFAULT_WRITER_MEMORY_MB,
        }
    }
}

impl IndexConfig {
    pub fn new(index_path: impl Into<PathBuf>) -> Self {
        Self {
            index_path: index_path.into(),
            writer_memory_mb: DEFAULT_WRITER_MEMORY_MB,
        }
    }

    pub fn with_memory_mb(mut self, mb: usize) -> Self {
        self.writer_memory_mb = mb;
        self
    }
}

/// Tantivy index with a single writer and a manually reloaded reader.
///
/// Adds and deletes share the writer under a read lock; commit and
/// rollback take it exclusively. The reader is reloaded after each commit
/// so searches observe exactly the committed state.
pub struct TantivyIndex {
    index: Index,
    schema: TrackerSchema,
    writer: RwLock<IndexWriter>,
    reader: IndexReader,
    query_parser: QueryParser,
}

impl TantivyIndex {
    /// Open existing index or create new one.
    pub fn open_or_create(config: IndexConfig) -> Result<Self, SearchError> {
        let path = &config.index_path;
        let index = if path.join("meta.json").exists() {
            debug!(path = ?path, "Opening existing index");
            Index::open_in_dir(path)?
        } else {
            info!(path = ?path, "Creating new index");
            std::fs::create_dir_all(path)?;
            Index::create_in_dir(path, build_tracker_schema().schema().clone())?
        };
        Self::from_index(index, config.writer_memory_mb)
    }

    /// Create a volatile index, mainly for tests.
    pub fn create_in_ram() -> Result<Self, SearchError> {
        let index = Index::create_in_ram(build_tracker_schema().schema().clone());
        Self::from_index(index, DEFAULT_WRITER_MEMORY_MB)
    }

    fn from_index(index: Index, writer_memory_mb: usize) -> Result<Self, SearchError> {
        let schema = TrackerSchema::from_schema(index.schema())?;
        let writer: IndexWriter =
            index.writer_with_num_threads(1, writer_memory_mb * 1024 * 1024)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let query_parser = QueryParser::for_index(&index, vec![schema.text]);
        debug!(memory_mb = writer_memory_mb, "Created index writer");

        Ok(Self {
            index,
            schema,
            writer: RwLock::new(writer),
            reader,
            query_parser,
        })
    }

    pub fn schema(&self) -> &TrackerSchema {
        &self.schema
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Check if an index exists at the given path
    pub fn exists(path: &Path) -> bool {
        path.join("meta.json").exists()
    }

    fn text_term(field: Field, value: &str) -> Box<dyn Query> {
        Box::new(TermQuery::new(
            Term::from_field_text(field, value),
            IndexRecordOption::Basic,
        ))
    }

    fn u64_term(field: Field, value: u64) -> Box<dyn Query> {
        Box::new(TermQuery::new(
            Term::from_field_u64(field, value),
            IndexRecordOption::Basic,
        ))
    }

    fn build_query(&self, predicate: &Predicate) -> Result<Box<dyn Query>, SearchError> {
        let s = &self.schema;
        let query: Box<dyn Query> = match predicate {
            Predicate::All => Box::new(AllQuery),
            Predicate::Id(id) => Self::text_term(s.id, id),
            Predicate::DocType(t) => Self::text_term(s.doc_type, t.as_str()),
            Predicate::Tenant(t) => Self::text_term(s.tenant, t),
            Predicate::Dbid(v) => Self::u64_term(s.dbid, *v),
            Predicate::Txid(v) => Self::u64_term(s.txid, *v),
            Predicate::AclId(v) => Self::u64_term(s.acl_id, *v),
            Predicate::AclTxId(v) => Self::u64_term(s.acl_tx_id, *v),
            Predicate::Reader(a) => Self::text_term(s.readers, a),
            Predicate::Denied(a) => Self::text_term(s.denied, a),
            Predicate::Ancestor(r) => Self::text_term(s.ancestors, r),
            Predicate::ContentStatus(c) => Self::text_term(s.content_status, c.as_str()),
            Predicate::Cascade(c) => Self::text_term(s.cascade, c.as_str()),
            Predicate::Text(q) if q.trim().is_empty() => Box::new(AllQuery),
            Predicate::Text(q) => self.query_parser.parse_query(q)?,
            Predicate::And(ps) if ps.is_empty() => Box::new(AllQuery),
            Predicate::And(ps) => Box::new(BooleanQuery::new(self.clauses(Occur::Must, ps)?)),
            Predicate::Or(ps) if ps.is_empty() => Box::new(EmptyQuery),
            Predicate::Or(ps) => Box::new(BooleanQuery::new(self.clauses(Occur::Should, ps)?)),
            Predicate::Not(p) => Box::new(BooleanQuery::new(vec![
                (Occur::Must, Box::new(AllQuery) as Box<dyn Query>),
                (Occur::MustNot, self.build_query(p)?),
            ])),
        };
        Ok(query)
    }

    fn clauses(
        &self,
        occur: Occur,
        predicates: &[Predicate],
    ) -> Result<Vec<(Occur, Box<dyn Query>)>, SearchError> {
        predicates
            .iter()
            .map(|p| Ok((occur, self.build_query(p)?)))
            .collect()
    }

    fn delete_term(&self, key: &DeleteKey) -> Term {
        let s = &self.schema;
        match key {
            DeleteKey::Id(id) => Term::from_field_text(s.id, id),
            DeleteKey::Dbid(v) => Term::from_field_u64(s.dbid, *v),
            DeleteKey::Txid(v) => Term::from_field_u64(s.txid, *v),
            DeleteKey::AclTxId(v) => Term::from_field_u64(s.acl_tx_id, *v),
            DeleteKey::DocType(t) => Term::from_field_text(s.doc_type, t.as_str()),
        }
    }
}

impl IndexFacade for TantivyIndex {
    fn add_or_update(&self, doc: &IndexDocument) -> Result<(), SearchError> {
        let encoded = doc.to_tantivy(&self.schema)?;
        let writer = self
            .writer
            .read()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))?;

        // Delete existing document with same ID (for update)
        writer.delete_term(Term::from_field_text(self.schema.id, &doc.id));
        writer.add_document(encoded)?;

        debug!(id = %doc.id, doc_type = doc.doc_type.as_str(), "Indexed document");
        Ok(())
    }

    fn delete(&self, key: &DeleteKey) -> Result<(), SearchError> {
        let term = self.delete_term(key);
        let writer = self
            .writer
            .read()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))?;
        writer.delete_term(term);
        debug!(key = ?key, "Deleted documents");
        Ok(())
    }

    fn commit(&self) -> Result<u64, SearchError> {
        let opstamp = {
            let mut writer = self
                .writer
                .write()
                .map_err(|e| SearchError::IndexLocked(e.to_string()))?;
            writer.commit()?
        };
        self.reader.reload()?;
        info!(opstamp, "Committed index changes");
        Ok(opstamp)
    }

    fn rollback(&self) -> Result<u64, SearchError> {
        let mut writer = self
            .writer
            .write()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))?;
        let opstamp = writer.rollback()?;
        warn!(opstamp, "Rolled back index changes");
        Ok(opstamp)
    }

    fn search(
        &self,
        predicate: &Predicate,
        limit: usize,
    ) -> Result<Vec<IndexDocument>, SearchError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let query = self.build_query(predicate)?;
        let searcher = self.reader.searcher();
        let limit = limit.min(searcher.num_docs() as usize);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;

        let mut docs = Vec::with_capacity(top_docs.len());
        for (_score, address) in top_docs {
            let stored: TantivyDocument = searcher.doc(address)?;
            docs.push(IndexDocument::from_tantivy(&stored, &self.schema)?);
        }
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(docs)
    }

    fn count(&self, predicate: &Predicate) -> Result<usize, SearchError> {
        let query = self.build_query(predicate)?;
        let searcher = self.reader.searcher();
        Ok(searcher.search(&query, &Count)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{node_doc_id, ContentStatus, DocType};
    use tempfile::TempDir;

    fn node(dbid: u64, txid: u64, acl_id: u64, text: &str) -> IndexDocument {
        let mut doc = IndexDocument::new(node_doc_id(dbid), DocType::Node);
        doc.dbid = Some(dbid);
        doc.txid = Some(txid);
        doc.acl_id = Some(acl_id);
        doc.text = text.to_string();
        doc
    }

    #[test]
    fn test_create_and_reopen_index() {
        let temp_dir = TempDir::new().unwrap();
        {
            let index = TantivyIndex::open_or_create(IndexConfig::new(temp_dir.path())).unwrap();
            index.add_or_update(&node(1, 1, 1, "hello")).unwrap();
            index.commit().unwrap();
        }
        assert!(TantivyIndex::exists(temp_dir.path()));

        let reopened = TantivyIndex::open_or_create(IndexConfig::new(temp_dir.path())).unwrap();
        assert_eq!(reopened.count(&Predicate::Dbid(1)).unwrap(), 1);
    }

    #[test]
    fn test_uncommitted_documents_are_invisible() {
        let index = TantivyIndex::create_in_ram().unwrap();
        index.add_or_update(&node(1, 1, 1, "hello world")).unwrap();
        assert_eq!(index.count(&Predicate::All).unwrap(), 0);

        index.commit().unwrap();
        assert_eq!(index.count(&Predicate::All).unwrap(), 1);
    }

    #[test]
    fn test_add_or_update_replaces_by_id() {
        let index = TantivyIndex::create_in_ram().unwrap();
        index.add_or_update(&node(1, 1, 1, "first")).unwrap();
        index.add_or_update(&node(1, 2, 1, "second")).unwrap();
        index.commit().unwrap();
        index.add_or_update(&node(1, 3, 1, "third")).unwrap();
        index.commit().unwrap();

        let docs = index.search(&Predicate::Dbid(1), 10).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].txid, Some(3));
        assert_eq!(docs[0].text, "third");
    }

    #[test]
    fn test_rollback_discards_pending_writes() {
        let index = TantivyIndex::create_in_ram().unwrap();
        index.add_or_update(&node(1, 1, 1, "kept")).unwrap();
        index.commit().unwrap();

        index.add_or_update(&node(2, 2, 1, "dropped")).unwrap();
        index.delete(&DeleteKey::Dbid(1)).unwrap();
        index.rollback().unwrap();
        index.commit().unwrap();

        assert_eq!(index.count(&Predicate::Dbid(1)).unwrap(), 1);
        assert_eq!(index.count(&Predicate::Dbid(2)).unwrap(), 0);
    }

    #[test]
    fn test_delete_by_transaction() {
        let index = TantivyIndex::create_in_ram().unwrap();
        index.add_or_update(&node(1, 7, 1, "a")).unwrap();
        index.add_or_update(&node(2, 7, 1, "b")).unwrap();
        index.add_or_update(&node(3, 8, 1, "c")).unwrap();
        index.commit().unwrap();

        index.delete(&DeleteKey::Txid(7)).unwrap();
        index.commit().unwrap();

        let docs = index.search(&Predicate::All, 10).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].dbid, Some(3));
    }

    #[test]
    fn test_boolean_predicates() {
        let index = TantivyIndex::create_in_ram().unwrap();
        let mut dirty = node(1, 1, 10, "hello world");
        dirty.content_status = Some(ContentStatus::Dirty);
        index.add_or_update(&dirty).unwrap();
        index.add_or_update(&node(2, 1, 20, "hello there")).unwrap();
        index.add_or_update(&node(3, 1, 30, "goodbye world")).unwrap();
        index.commit().unwrap();

        let world = Predicate::Text("world".into());
        assert_eq!(index.count(&world).unwrap(), 2);

        let in_acls = Predicate::and([
            world.clone(),
            Predicate::or([Predicate::AclId(10), Predicate::AclId(20)]),
        ]);
        let docs = index.search(&in_acls, 10).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].dbid, Some(1));

        let not_dirty = Predicate::not(Predicate::ContentStatus(ContentStatus::Dirty));
        assert_eq!(index.count(&not_dirty).unwrap(), 2);

        assert_eq!(index.count(&Predicate::Or(vec![])).unwrap(), 0);
    }

    #[test]
    fn test_get_by_id_and_zero_limit() {
        let index = TantivyIndex::create_in_ram().unwrap();
        index.add_or_update(&node(4, 1, 1, "x")).unwrap();
        index.commit().unwrap();

        assert!(index.get("NODE!4").unwrap().is_some());
        assert!(index.get("NODE!5").unwrap().is_none());
        assert!(index.search(&Predicate::All, 0).unwrap().is_empty());
    }
}
