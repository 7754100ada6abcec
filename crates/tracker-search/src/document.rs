//! Index document model and its Tantivy encoding.
//!
//! [`IndexDocument`] is the unit trackers write through the facade. It is
//! also serialized to JSON and kept in the content cache so that later
//! trackers can rebuild a document without refetching its metadata.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tantivy::schema::{Field, Value};
use tantivy::TantivyDocument;

use tracker_types::{AclChangeSet, AclReaders, Transaction, TrackerState, DEFAULT_TENANT};

use crate::error::SearchError;
use crate::schema::TrackerSchema;

/// Document types stored in the index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    #[default]
    Node,
    /// Placeholder for a node whose metadata could not be fetched or transformed
    ErrorNode,
    Acl,
    Transaction,
    AclChangeSet,
    State,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Node => "node",
            DocType::ErrorNode => "error_node",
            DocType::Acl => "acl",
            DocType::Transaction => "tx",
            DocType::AclChangeSet => "acltx",
            DocType::State => "state",
        }
    }

    /// Parse from string, returning None for unknown types.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "node" => Some(DocType::Node),
            "error_node" => Some(DocType::ErrorNode),
            "acl" => Some(DocType::Acl),
            "tx" => Some(DocType::Transaction),
            "acltx" => Some(DocType::AclChangeSet),
            "state" => Some(DocType::State),
            _ => None,
        }
    }
}

impl std::str::FromStr for DocType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown doc type: {}", s))
    }
}

/// Whether a node document holds the latest text content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Clean,
    Dirty,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Clean => "clean",
            ContentStatus::Dirty => "dirty",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "clean" => Some(ContentStatus::Clean),
            "dirty" => Some(ContentStatus::Dirty),
            _ => None,
        }
    }
}

/// Cascade marker carried by transaction documents and cascading nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeStatus {
    Pending,
    Done,
}

impl CascadeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CascadeStatus::Pending => "pending",
            CascadeStatus::Done => "done",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(CascadeStatus::Pending),
            "done" => Some(CascadeStatus::Done),
            _ => None,
        }
    }
}

pub fn node_doc_id(dbid: u64) -> String {
    format!("NODE!{}", dbid)
}

pub fn acl_doc_id(acl_id: u64) -> String {
    format!("ACL!{}", acl_id)
}

pub fn tx_doc_id(txid: u64) -> String {
    format!("TX!{}", txid)
}

pub fn acl_tx_doc_id(acl_tx_id: u64) -> String {
    format!("ACLTX!{}", acl_tx_id)
}

/// A document as written to and read from the index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub id: String,
    pub doc_type: DocType,
    pub tenant: String,
    pub dbid: Option<u64>,
    pub txid: Option<u64>,
    pub acl_id: Option<u64>,
    pub acl_tx_id: Option<u64>,
    pub owner: Option<String>,
    pub node_type: Option<String>,
    pub node_ref: Option<String>,
    pub readers: Vec<String>,
    pub denied: Vec<String>,
    pub ancestors: Vec<String>,
    pub paths: Vec<String>,
    pub text: String,
    pub properties: BTreeMap<String, String>,
    pub content_status: Option<ContentStatus>,
    pub cascade: Option<CascadeStatus>,
    pub commit_time_ms: Option<u64>,
    pub last_indexed_id: Option<u64>,
    pub error: Option<String>,
}

impl IndexDocument {
    pub fn new(id: impl Into<String>, doc_type: DocType) -> Self {
        Self {
            id: id.into(),
            doc_type,
            tenant: DEFAULT_TENANT.to_string(),
            ..Self::default()
        }
    }

    /// Singleton document holding a tracker's high-water mark.
    pub fn state(key: &str, state: &TrackerState) -> Self {
        Self {
            last_indexed_id: Some(state.last_indexed_id),
            commit_time_ms: Some(state.last_indexed_commit_time_ms),
            ..Self::new(key, DocType::State)
        }
    }

    /// Decode the marker stored in a state document.
    pub fn to_tracker_state(&self) -> TrackerState {
        TrackerState::with_marker(
            self.last_indexed_id.unwrap_or(0),
            self.commit_time_ms.unwrap_or(0),
        )
    }

    pub fn transaction(tx: &Transaction) -> Self {
        let mut doc = Self {
            txid: Some(tx.id),
            commit_time_ms: Some(tx.commit_time_ms),
            ..Self::new(tx_doc_id(tx.id), DocType::Transaction)
        };
        doc.properties
            .insert("update_count".into(), tx.update_count.to_string());
        doc.properties
            .insert("delete_count".into(), tx.delete_count.to_string());
        doc
    }

    pub fn acl_change_set(change_set: &AclChangeSet) -> Self {
        let mut doc = Self {
            acl_tx_id: Some(change_set.id),
            commit_time_ms: Some(change_set.commit_time_ms),
            ..Self::new(acl_tx_doc_id(change_set.id), DocType::AclChangeSet)
        };
        doc.properties
            .insert("acl_count".into(), change_set.acl_count.to_string());
        doc
    }

    pub fn acl(readers: &AclReaders, change_set_id: u64) -> Self {
        Self {
            tenant: readers.tenant.clone(),
            acl_id: Some(readers.acl_id),
            acl_tx_id: Some(change_set_id),
            readers: readers.readers.iter().cloned().collect(),
            denied: readers.denied.iter().cloned().collect(),
            ..Self::new(acl_doc_id(readers.acl_id), DocType::Acl)
        }
    }

    /// Stub standing in for a node that failed to index.
    ///
    /// It shares the node document key so a later successful index
    /// replaces it.
    pub fn error_node(
        dbid: u64,
        txid: u64,
        acl_id: u64,
        tenant: &str,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            tenant: tenant.to_string(),
            dbid: Some(dbid),
            txid: Some(txid),
            acl_id: Some(acl_id),
            error: Some(reason.into()),
            ..Self::new(node_doc_id(dbid), DocType::ErrorNode)
        }
    }

    /// Encode for storage in the content cache.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SearchError> {
        serde_json::to_vec(self).map_err(|e| SearchError::InvalidDocument {
            id: self.id.clone(),
            reason: e.to_string(),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SearchError> {
        serde_json::from_slice(bytes).map_err(|e| SearchError::InvalidDocument {
            id: "<cached>".to_string(),
            reason: e.to_string(),
        })
    }

    /// Convert to a Tantivy document using the given schema.
    pub fn to_tantivy(&self, schema: &TrackerSchema) -> Result<TantivyDocument, SearchError> {
        let mut doc = TantivyDocument::new();
        doc.add_text(schema.id, &self.id);
        doc.add_text(schema.doc_type, self.doc_type.as_str());
        doc.add_text(schema.tenant, &self.tenant);

        let numeric = [
            (schema.dbid, self.dbid),
            (schema.txid, self.txid),
            (schema.acl_id, self.acl_id),
            (schema.acl_tx_id, self.acl_tx_id),
            (schema.commit_time, self.commit_time_ms),
            (schema.last_indexed_id, self.last_indexed_id),
        ];
        for (field, value) in numeric {
            if let Some(v) = value {
                doc.add_u64(field, v);
            }
        }

        let single = [
            (schema.owner, self.owner.as_deref()),
            (schema.node_type, self.node_type.as_deref()),
            (schema.node_ref, self.node_ref.as_deref()),
            (schema.content_status, self.content_status.map(|s| s.as_str())),
            (schema.cascade, self.cascade.map(|s| s.as_str())),
            (schema.error, self.error.as_deref()),
        ];
        for (field, value) in single {
            if let Some(v) = value {
                doc.add_text(field, v);
            }
        }

        let multi = [
            (schema.readers, &self.readers),
            (schema.denied, &self.denied),
            (schema.ancestors, &self.ancestors),
            (schema.paths, &self.paths),
        ];
        for (field, values) in multi {
            for v in values {
                doc.add_text(field, v);
            }
        }

        if !self.text.is_empty() {
            doc.add_text(schema.text, &self.text);
        }
        if !self.properties.is_empty() {
            let json =
                serde_json::to_string(&self.properties).map_err(|e| SearchError::InvalidDocument {
                    id: self.id.clone(),
                    reason: e.to_string(),
                })?;
            doc.add_text(schema.properties, &json);
        }

        Ok(doc)
    }

    /// Decode a stored Tantivy document.
    pub fn from_tantivy(doc: &TantivyDocument, schema: &TrackerSchema) -> Result<Self, SearchError> {
        let text = |field: Field| {
            doc.get_first(field)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        let number = |field: Field| doc.get_first(field).and_then(|v| v.as_u64());
        let all = |field: Field| {
            doc.get_all(field)
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect::<Vec<_>>()
        };

        let id = text(schema.id).unwrap_or_default();
        let doc_type = text(schema.doc_type)
            .as_deref()
            .and_then(DocType::parse)
            .ok_or_else(|| SearchError::InvalidDocument {
                id: id.clone(),
                reason: "missing or unknown doc_type".to_string(),
            })?;

        let properties = match text(schema.properties) {
            Some(json) => {
                serde_json::from_str(&json).map_err(|e| SearchError::InvalidDocument {
                    id: id.clone(),
                    reason: e.to_string(),
                })?
            }
            None => BTreeMap::new(),
        };

        Ok(Self {
            doc_type,
            tenant: text(schema.tenant).unwrap_or_else(|| DEFAULT_TENANT.to_string()),
            dbid: number(schema.dbid),
            txid: number(schema.txid),
            acl_id: number(schema.acl_id),
            acl_tx_id: number(schema.acl_tx_id),
            owner: text(schema.owner),
            node_type: text(schema.node_type),
            node_ref: text(schema.node_ref),
            readers: all(schema.readers),
            denied: all(schema.denied),
            ancestors: all(schema.ancestors),
            paths: all(schema.paths),
            text: text(schema.text).unwrap_or_default(),
            properties,
            content_status: text(schema.content_status)
                .as_deref()
                .and_then(ContentStatus::parse),
            cascade: text(schema.cascade).as_deref().and_then(CascadeStatus::parse),
            commit_time_ms: number(schema.commit_time),
            last_indexed_id: number(schema.last_indexed_id),
            error: text(schema.error),
            id,
        })
    }
}
