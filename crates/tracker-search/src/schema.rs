//! Tantivy schema for tracker documents.
//!
//! A single schema holds every document kind. Keyword fields are
//! `STRING | STORED`, numeric keys are indexed, stored and fast u64 fields,
//! and `text` is the only tokenized field.

use tantivy::schema::{Field, NumericOptions, Schema, STORED, STRING, TEXT};

use crate::SearchError;

/// Schema field handles for efficient access
#[derive(Debug, Clone)]
pub struct TrackerSchema {
    schema: Schema,
    /// Primary key, e.g. `NODE!12` or `TRACKER!STATE!TX`
    pub id: Field,
    pub doc_type: Field,
    pub tenant: Field,
    /// Repository node id
    pub dbid: Field,
    /// Transaction id
    pub txid: Field,
    pub acl_id: Field,
    /// ACL change set id
    pub acl_tx_id: Field,
    pub owner: Field,
    pub node_type: Field,
    pub node_ref: Field,
    /// Principals granted read access (ACL documents)
    pub readers: Field,
    /// Principals denied read access (ACL documents)
    pub denied: Field,
    pub ancestors: Field,
    pub paths: Field,
    /// Searchable text (TEXT | STORED)
    pub text: Field,
    /// JSON encoded property map (STORED only)
    pub properties: Field,
    pub content_status: Field,
    pub cascade: Field,
    pub commit_time: Field,
    pub last_indexed_id: Field,
    pub error: Field,
}

fn field(schema: &Schema, name: &str) -> Result<Field, SearchError> {
    schema
        .get_field(name)
        .map_err(|_| SearchError::SchemaMismatch(format!("missing {} field", name)))
}

impl TrackerSchema {
    /// Get the underlying Tantivy schema
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Create a TrackerSchema from an existing Tantivy Schema
    pub fn from_schema(schema: Schema) -> Result<Self, SearchError> {
        Ok(Self {
            id: field(&schema, "id")?,
            doc_type: field(&schema, "doc_type")?,
            tenant: field(&schema, "tenant")?,
            dbid: field(&schema, "dbid")?,
            txid: field(&schema, "txid")?,
            acl_id: field(&schema, "acl_id")?,
            acl_tx_id: field(&schema, "acl_tx_id")?,
            owner: field(&schema, "owner")?,
            node_type: field(&schema, "node_type")?,
            node_ref: field(&schema, "node_ref")?,
            readers: field(&schema, "readers")?,
            denied: field(&schema, "denied")?,
            ancestors: field(&schema, "ancestors")?,
            paths: field(&schema, "paths")?,
            text: field(&schema, "text")?,
            properties: field(&schema, "properties")?,
            content_status: field(&schema, "content_status")?,
            cascade: field(&schema, "cascade")?,
            commit_time: field(&schema, "commit_time")?,
            last_indexed_id: field(&schema, "last_indexed_id")?,
            error: field(&schema, "error")?,
            schema,
        })
    }
}

/// Build the tracker index schema.
pub fn build_tracker_schema() -> TrackerSchema {
    let mut builder = Schema::builder();

    let numeric = NumericOptions::default()
        .set_indexed()
        .set_stored()
        .set_fast();

    let id = builder.add_text_field("id", STRING | STORED);
    let doc_type = builder.add_text_field("doc_type", STRING | STORED);
    let tenant = builder.add_text_field("tenant", STRING | STORED);
    let dbid = builder.add_u64_field("dbid", numeric.clone());
    let txid = builder.add_u64_field("txid", numeric.clone());
    let acl_id = builder.add_u64_field("acl_id", numeric.clone());
    let acl_tx_id = builder.add_u64_field("acl_tx_id", numeric.clone());
    let owner = builder.add_text_field("owner", STRING | STORED);
    let node_type = builder.add_text_field("node_type", STRING | STORED);
    let node_ref = builder.add_text_field("node_ref", STRING | STORED);
    let readers = builder.add_text_field("readers", STRING | STORED);
    let denied = builder.add_text_field("denied", STRING | STORED);
    let ancestors = builder.add_text_field("ancestors", STRING | STORED);
    let paths = builder.add_text_field("paths", STRING | STORED);
    let text = builder.add_text_field("text", TEXT | STORED);
    let properties = builder.add_text_field("properties", STORED);
    let content_status = builder.add_text_field("content_status", STRING | STORED);
    let cascade = builder.add_text_field("cascade", STRING | STORED);
    let commit_time = builder.add_u64_field("commit_time", numeric.clone());
    let last_indexed_id = builder.add_u64_field("last_indexed_id", numeric);
    let error = builder.add_text_field("error", STORED);

    TrackerSchema {
        schema: builder.build(),
        id,
        doc_type,
        tenant,
        dbid,
        txid,
        acl_id,
        acl_tx_id,
        owner,
        node_type,
        node_ref,
        readers,
        denied,
        ancestors,
        paths,
        text,
        properties,
        content_status,
        cascade,
        commit_time,
        last_indexed_id,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_schema_roundtrips_through_from_schema() {
        let built = build_tracker_schema();
        let reparsed = TrackerSchema::from_schema(built.schema().clone()).unwrap();
        assert_eq!(built.id, reparsed.id);
        assert_eq!(built.acl_tx_id, reparsed.acl_tx_id);
        assert_eq!(built.error, reparsed.error);
    }

    #[test]
    fn test_from_schema_reports_missing_field() {
        let mut builder = Schema::builder();
        builder.add_text_field("id", STRING | STORED);
        let result = TrackerSchema::from_schema(builder.build());
        assert!(matches!(result, Err(SearchError::SchemaMismatch(msg)) if msg.contains("doc_type")));
    }
}
