//! End-to-end test infrastructure for the repository trackers.
//!
//! Provides a shared [`TestHarness`] that wires one core (an on-disk
//! Tantivy index, a read-write content cache and every tracker) to an
//! in-memory repository, plus builders for repository fixtures.

use std::path::PathBuf;
use std::sync::{Arc, Once};
use std::time::Duration;

use tracker_cache::ContentCache;
use tracker_core::{
    state_store, CoreTrackers, MockRepositoryClient, ModelTracker, Tracker, TrackerError,
    TrackerRegistry,
};
use tracker_search::{authorised_search, IndexConfig, IndexDocument, IndexFacade, Predicate, TantivyIndex};
use tracker_types::{
    AclReaders, BatchSettings, DataType, DictionaryModel, NodeMetaData, PropertyValue,
    TrackerKind,
};

/// Name of the core every harness serves.
pub const CORE: &str = "alfresco";

static TRACING: Once = Once::new();

/// Install a fmt subscriber honouring `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// One core wired to an in-memory repository.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub index_path: PathBuf,
    pub cache_path: PathBuf,
    pub client: Arc<MockRepositoryClient>,
    pub facade: Arc<TantivyIndex>,
    pub cache: Arc<ContentCache>,
    pub registry: Arc<TrackerRegistry>,
    pub models: Arc<ModelTracker>,
    pub core: Arc<CoreTrackers>,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_batch(BatchSettings::default()).await
    }

    pub async fn with_batch(batch: BatchSettings) -> Self {
        init_tracing();
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let client = Arc::new(MockRepositoryClient::new());
        client.add_model(content_model());
        Self::open(temp_dir, client, batch).await
    }

    async fn open(
        temp_dir: tempfile::TempDir,
        client: Arc<MockRepositoryClient>,
        batch: BatchSettings,
    ) -> Self {
        let index_path = temp_dir.path().join("index");
        let cache_path = temp_dir.path().join("content");

        let facade = Arc::new(
            TantivyIndex::open_or_create(IndexConfig::new(&index_path))
                .expect("Failed to open index"),
        );
        let cache = Arc::new(ContentCache::open(&cache_path).expect("Failed to open content cache"));

        let registry = Arc::new(TrackerRegistry::new());
        let models = registry
            .ensure_model_tracker(client.clone())
            .await
            .expect("Failed to load models");
        let core = Arc::new(
            CoreTrackers::builder(CORE, client.clone(), facade.clone(), cache.clone(), models.clone())
                .with_batch(batch)
                .with_commit_interval(Duration::ZERO)
                .build()
                .expect("Failed to build core"),
        );
        registry.register_core(core.clone());

        Self {
            _temp_dir: temp_dir,
            index_path,
            cache_path,
            client,
            facade,
            cache,
            registry,
            models,
            core,
        }
    }

    /// Drop every tracker and reopen index and cache from disk, keeping
    /// the repository.
    pub async fn restart(self) -> Self {
        let TestHarness {
            _temp_dir,
            client,
            facade,
            cache,
            registry,
            models,
            core,
            ..
        } = self;
        core.shutdown();
        drop(core);
        registry.remove_trackers_for_core(CORE);
        drop(registry);
        drop(models);
        drop(cache);
        drop(facade);
        Self::open(_temp_dir, client, BatchSettings::default()).await
    }

    /// Run every tracker of the core once, commit tracker last.
    ///
    /// Every tracker runs even if an earlier one fails; the first error
    /// is returned.
    pub async fn run_cycle(&self) -> Result<(), TrackerError> {
        let mut first_error = None;
        for tracker in self.core.all() {
            if let Err(e) = tracker.track().await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Run `n` full cycles, ignoring tracker failures.
    pub async fn run_cycles(&self, n: usize) {
        for _ in 0..n {
            let _ = self.run_cycle().await;
        }
    }

    pub fn count(&self, predicate: &Predicate) -> usize {
        self.facade.count(predicate).expect("Failed to count")
    }

    pub fn get(&self, id: &str) -> Option<IndexDocument> {
        self.facade.get(id).expect("Failed to get document")
    }

    /// Committed node documents matching `text` readable by `authority`.
    pub fn search_as(&self, text: &str, authority: &str) -> Vec<IndexDocument> {
        authorised_search(self.facade.as_ref(), text, authority, 1_000).expect("Failed to search")
    }

    /// Durable high-water mark of a tracker, read back from the index.
    pub fn durable_marker(&self, kind: TrackerKind) -> u64 {
        state_store::load_state(self.facade.as_ref(), kind)
            .expect("Failed to load state")
            .last_indexed_id
    }
}

/// Model declaring the properties used by the fixtures.
pub fn content_model() -> DictionaryModel {
    DictionaryModel::new("cm:contentmodel", 1)
        .with_property("cm:name", DataType::Text)
        .with_property("cm:title", DataType::Text)
        .with_property("cm:size", DataType::Long)
        .with_property("cm:content", DataType::Content)
}

/// A named document node in `txid`, guarded by `acl_id`.
pub fn document(id: u64, txid: u64, acl_id: u64, name: &str) -> NodeMetaData {
    NodeMetaData::new(id, txid, acl_id, node_ref(id).as_str())
        .with_property("cm:name", PropertyValue::text(name))
        .with_paths([format!("/{name}")])
}

/// A document node with binary content to be fetched by the content tracker.
pub fn document_with_content(id: u64, txid: u64, acl_id: u64, name: &str) -> NodeMetaData {
    document(id, txid, acl_id, name).with_property(
        "cm:content",
        PropertyValue::Content {
            size: 64,
            mimetype: "text/plain".to_string(),
        },
    )
}

pub fn node_ref(id: u64) -> String {
    format!("workspace://SpacesStore/{id}")
}

/// Readers of one ACL, with nobody denied.
pub fn readers(acl_id: u64, readers: &[&str]) -> AclReaders {
    AclReaders::new(acl_id, readers.iter().copied(), Vec::<String>::new())
}
