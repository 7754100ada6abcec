//! Fixture wiring a full core over an in-memory repository.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tracker_cache::ContentCache;
use tracker_search::{IndexFacade, TantivyIndex};
use tracker_types::{BatchSettings, DataType, DictionaryModel, NodeMetaData, PropertyValue};

use crate::client::MockRepositoryClient;
use crate::registry::CoreTrackers;
use crate::tracker::Tracker;
use crate::trackers::ModelTracker;

pub(crate) struct Fixture {
    _dir: TempDir,
    pub client: Arc<MockRepositoryClient>,
    pub facade: Arc<TantivyIndex>,
    pub cache: Arc<ContentCache>,
    pub core: CoreTrackers,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_batch(BatchSettings::default()).await
    }

    pub async fn with_batch(batch: BatchSettings) -> Self {
        Self::build(batch, Duration::ZERO).await
    }

    pub async fn with_commit_interval(interval: Duration) -> Self {
        Self::build(BatchSettings::default(), interval).await
    }

    async fn build(batch: BatchSettings, commit_interval: Duration) -> Self {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(MockRepositoryClient::new());
        client.add_model(
            DictionaryModel::new("cm:contentmodel", 1)
                .with_property("cm:name", DataType::Text)
                .with_property("cm:size", DataType::Long),
        );
        let models = Arc::new(ModelTracker::new(client.clone()));
        models.ensure_first_model_sync().await.unwrap();

        let facade = Arc::new(TantivyIndex::create_in_ram().unwrap());
        let cache = Arc::new(ContentCache::open(dir.path().join("content")).unwrap());
        let core = CoreTrackers::builder(
            "alfresco",
            client.clone(),
            facade.clone(),
            cache.clone(),
            models,
        )
        .with_batch(batch)
        .with_commit_interval(commit_interval)
        .build()
        .unwrap();

        Self {
            _dir: dir,
            client,
            facade,
            cache,
            core,
        }
    }

    /// Run every tracker once, commit tracker last.
    pub async fn cycle(&self) {
        for tracker in self.core.all() {
            tracker.track().await.ok();
        }
    }

    pub fn count(&self, predicate: &tracker_search::Predicate) -> usize {
        self.facade.count(predicate).unwrap()
    }
}

/// A named node stored in `txid`.
pub(crate) fn named_node(id: u64, txid: u64, acl_id: u64, name: &str) -> NodeMetaData {
    NodeMetaData::new(id, txid, acl_id, format!("workspace://SpacesStore/{id}").as_str())
        .with_property("cm:name", PropertyValue::text(name))
}
