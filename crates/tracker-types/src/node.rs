//! Node transaction change-log entries.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tenant used when the repository does not report one.
pub const DEFAULT_TENANT: &str = "_DEFAULT_";

/// Property whose `true` value asks for descendants to be re-derived.
pub const CASCADE_PROPERTY: &str = "sys:cascadeTx";

/// Qualified property or type name, e.g. `cm:name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QName(String);

impl QName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Stable reference to a repository node, e.g. `workspace://SpacesStore/<uuid>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeRef(String);

impl NodeRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A typed property value as reported by the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Text(String),
    Long(i64),
    Double(f64),
    Boolean(bool),
    Date(DateTime<Utc>),
    /// Reference to binary content fetched separately by the content tracker
    Content {
        size: u64,
        mimetype: String,
    },
    Multi(Vec<PropertyValue>),
}

impl PropertyValue {
    pub fn text(value: impl Into<String>) -> Self {
        PropertyValue::Text(value.into())
    }

    /// Render the value as it is stored in the index.
    pub fn to_index_string(&self) -> String {
        match self {
            PropertyValue::Text(s) => s.clone(),
            PropertyValue::Long(v) => v.to_string(),
            PropertyValue::Double(v) => v.to_string(),
            PropertyValue::Boolean(v) => v.to_string(),
            PropertyValue::Date(d) => d.to_rfc3339(),
            PropertyValue::Content { size, mimetype } => format!("{mimetype};size={size}"),
            PropertyValue::Multi(values) => values
                .iter()
                .map(PropertyValue::to_index_string)
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    /// Collect the free-text fragments of this value.
    pub fn collect_text<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            PropertyValue::Text(s) => out.push(s),
            PropertyValue::Multi(values) => values.iter().for_each(|v| v.collect_text(out)),
            _ => {}
        }
    }

    pub fn is_content(&self) -> bool {
        match self {
            PropertyValue::Content { .. } => true,
            PropertyValue::Multi(values) => values.iter().any(PropertyValue::is_content),
            _ => false,
        }
    }
}

/// A batch of node mutations committed together by the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Strictly increasing transaction id
    pub id: u64,
    /// Repository commit time in milliseconds since epoch
    pub commit_time_ms: u64,
    pub update_count: usize,
    pub delete_count: usize,
}

impl Transaction {
    pub fn new(id: u64, commit_time_ms: u64, update_count: usize, delete_count: usize) -> Self {
        Self {
            id,
            commit_time_ms,
            update_count,
            delete_count,
        }
    }

    /// A transaction with nothing to apply.
    pub fn is_empty(&self) -> bool {
        self.update_count == 0 && self.delete_count == 0
    }
}

/// Mutation kind of a node inside a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Updated,
    Deleted,
}

/// A node touched by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: u64,
    pub transaction_id: u64,
    pub acl_id: u64,
    pub status: NodeStatus,
    pub tenant: String,
}

impl Node {
    pub fn updated(id: u64, transaction_id: u64, acl_id: u64) -> Self {
        Self {
            id,
            transaction_id,
            acl_id,
            status: NodeStatus::Updated,
            tenant: DEFAULT_TENANT.to_string(),
        }
    }

    pub fn deleted(id: u64, transaction_id: u64, acl_id: u64) -> Self {
        Self {
            status: NodeStatus::Deleted,
            ..Self::updated(id, transaction_id, acl_id)
        }
    }
}

/// Full metadata of an updated node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMetaData {
    pub id: u64,
    pub acl_id: u64,
    pub transaction_id: u64,
    pub node_ref: NodeRef,
    pub owner: String,
    pub node_type: QName,
    pub properties: BTreeMap<QName, PropertyValue>,
    /// Every structural ancestor, not just the parent
    pub ancestors: BTreeSet<NodeRef>,
    pub paths: Vec<String>,
    pub tenant: String,
}

impl NodeMetaData {
    pub fn new(id: u64, transaction_id: u64, acl_id: u64, node_ref: impl Into<NodeRef>) -> Self {
        Self {
            id,
            acl_id,
            transaction_id,
            node_ref: node_ref.into(),
            owner: String::new(),
            node_type: QName::new("cm:content"),
            properties: BTreeMap::new(),
            ancestors: BTreeSet::new(),
            paths: Vec::new(),
            tenant: DEFAULT_TENANT.to_string(),
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn with_type(mut self, node_type: impl Into<QName>) -> Self {
        self.node_type = node_type.into();
        self
    }

    pub fn with_property(mut self, name: impl Into<QName>, value: PropertyValue) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    pub fn with_ancestors<I, R>(mut self, ancestors: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<NodeRef>,
    {
        self.ancestors = ancestors.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = tenant.into();
        self
    }

    /// Whether this change must be propagated to every descendant.
    pub fn requires_cascade(&self) -> bool {
        matches!(
            self.properties.get(&QName::from(CASCADE_PROPERTY)),
            Some(PropertyValue::Boolean(true))
        )
    }

    /// Whether the node carries binary content to be fetched separately.
    pub fn has_content(&self) -> bool {
        self.properties.values().any(PropertyValue::is_content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_transaction() {
        assert!(Transaction::new(1, 0, 0, 0).is_empty());
        assert!(!Transaction::new(2, 0, 1, 0).is_empty());
        assert!(!Transaction::new(3, 0, 0, 4).is_empty());
    }

    #[test]
    fn test_cascade_flag() {
        let meta = NodeMetaData::new(1, 1, 1, "workspace://SpacesStore/folder");
        assert!(!meta.requires_cascade());

        let meta = meta.with_property(CASCADE_PROPERTY, PropertyValue::Boolean(true));
        assert!(meta.requires_cascade());
    }

    #[test]
    fn test_has_content() {
        let meta = NodeMetaData::new(1, 1, 1, "workspace://SpacesStore/doc")
            .with_property("cm:name", PropertyValue::text("doc.txt"));
        assert!(!meta.has_content());

        let meta = meta.with_property(
            "cm:content",
            PropertyValue::Content {
                size: 5,
                mimetype: "text/plain".into(),
            },
        );
        assert!(meta.has_content());
    }

    #[test]
    fn test_collect_text_flattens_multi_values() {
        let value = PropertyValue::Multi(vec![
            PropertyValue::text("hello"),
            PropertyValue::Long(4),
            PropertyValue::text("world"),
        ]);
        let mut out = Vec::new();
        value.collect_text(&mut out);
        assert_eq!(out, vec!["hello", "world"]);
        assert_eq!(value.to_index_string(), "hello 4 world");
    }

    #[test]
    fn test_property_value_json_shape() {
        let json = serde_json::to_string(&PropertyValue::Long(42)).unwrap();
        assert_eq!(json, r#"{"type":"long","value":42}"#);
    }
}
