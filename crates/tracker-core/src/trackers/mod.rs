//! The change-log trackers bound to an index.

mod acl;
mod cascade;
mod commit;
mod content;
mod metadata;
mod model;

pub use acl::AclTracker;
pub use cascade::CascadeTracker;
pub use commit::{CommitTracker, COMMIT_LOCK_ORDER};
pub use content::ContentTracker;
pub use metadata::MetadataTracker;
pub use model::{ModelTracker, MODEL_TRACKER_CORE};

use tracker_cache::ContentCache;
use tracker_search::{node_doc_id, CascadeStatus, ContentStatus, DocType, IndexDocument};
use tracker_types::NodeMetaData;

use crate::error::TrackerError;

/// Build the index document of a node from its metadata.
///
/// Nodes with binary content start dirty; the content tracker fills in
/// their text later.
pub(crate) fn node_document(meta: &NodeMetaData) -> IndexDocument {
    let mut fragments = Vec::new();
    for value in meta.properties.values() {
        value.collect_text(&mut fragments);
    }
    let status = if meta.has_content() {
        ContentStatus::Dirty
    } else {
        ContentStatus::Clean
    };

    IndexDocument {
        tenant: meta.tenant.clone(),
        dbid: Some(meta.id),
        txid: Some(meta.transaction_id),
        acl_id: Some(meta.acl_id),
        owner: Some(meta.owner.clone()).filter(|o| !o.is_empty()),
        node_type: Some(meta.node_type.to_string()),
        node_ref: Some(meta.node_ref.to_string()),
        ancestors: meta.ancestors.iter().map(ToString::to_string).collect(),
        paths: meta.paths.clone(),
        text: fragments.join(" "),
        properties: meta
            .properties
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_index_string()))
            .collect(),
        content_status: Some(status),
        cascade: meta.requires_cascade().then_some(CascadeStatus::Pending),
        ..IndexDocument::new(node_doc_id(meta.id), DocType::Node)
    }
}

/// Rebuild the structural fields of `existing` from fresh metadata,
/// keeping its text and content status.
pub(crate) fn restructure(existing: &IndexDocument, meta: &NodeMetaData) -> IndexDocument {
    IndexDocument {
        text: existing.text.clone(),
        content_status: existing.content_status,
        cascade: existing.cascade,
        ..node_document(meta)
    }
}

pub(crate) fn cache_document(cache: &ContentCache, doc: &IndexDocument) -> Result<(), TrackerError> {
    if let Some(dbid) = doc.dbid {
        cache.store(&doc.tenant, dbid, &doc.to_bytes()?)?;
    }
    Ok(())
}

pub(crate) fn cached_document(
    cache: &ContentCache,
    tenant: &str,
    dbid: u64,
) -> Result<Option<IndexDocument>, TrackerError> {
    match cache.retrieve(tenant, dbid)? {
        Some(bytes) => Ok(Some(IndexDocument::from_bytes(&bytes)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracker_types::{PropertyValue, CASCADE_PROPERTY};

    #[test]
    fn test_node_document_fields() {
        let meta = NodeMetaData::new(7, 3, 11, "workspace://SpacesStore/7")
            .with_owner("joel")
            .with_property("cm:name", PropertyValue::text("hello"))
            .with_property(
                "cm:content",
                PropertyValue::Content {
                    size: 5,
                    mimetype: "text/plain".into(),
                },
            )
            .with_ancestors(["workspace://SpacesStore/root"])
            .with_paths(["/root/7"]);
        let doc = node_document(&meta);

        assert_eq!(doc.id, "NODE!7");
        assert_eq!(doc.doc_type, DocType::Node);
        assert_eq!(doc.txid, Some(3));
        assert_eq!(doc.acl_id, Some(11));
        assert_eq!(doc.owner.as_deref(), Some("joel"));
        assert_eq!(doc.text, "hello");
        assert_eq!(doc.content_status, Some(ContentStatus::Dirty));
        assert_eq!(doc.cascade, None);
        assert_eq!(doc.ancestors, vec!["workspace://SpacesStore/root".to_string()]);
        assert_eq!(doc.properties.get("cm:name").map(String::as_str), Some("hello"));
    }

    #[test]
    fn test_cascade_flag_marks_pending() {
        let meta = NodeMetaData::new(1, 1, 1, "folder")
            .with_property(CASCADE_PROPERTY, PropertyValue::Boolean(true));
        let doc = node_document(&meta);
        assert_eq!(doc.cascade, Some(CascadeStatus::Pending));
        assert_eq!(doc.content_status, Some(ContentStatus::Clean));
    }

    #[test]
    fn test_restructure_keeps_text() {
        let before = NodeMetaData::new(2, 1, 1, "child").with_paths(["/a/child"]);
        let mut existing = node_document(&before);
        existing.text = "hello world".into();

        let after = NodeMetaData::new(2, 1, 1, "child").with_paths(["/b/child"]);
        let doc = restructure(&existing, &after);
        assert_eq!(doc.paths, vec!["/b/child".to_string()]);
        assert_eq!(doc.text, "hello world");
    }
}
