//! Dictionary model tracker.
//!
//! One instance is shared by every core. Other trackers stay idle until the
//! first model sync has loaded at least one model.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::info;

use tracker_types::{DictionaryModel, NodeMetaData, PropertyDefinition, QName, TrackerKind};

use crate::client::RepositoryClient;
use crate::error::TrackerError;
use crate::tracker::{Tracker, TrackerBase};

/// Core name used by the shared model tracker.
pub const MODEL_TRACKER_CORE: &str = "_models_";

pub struct ModelTracker {
    base: TrackerBase,
    client: Arc<dyn RepositoryClient>,
    models: RwLock<HashMap<QName, DictionaryModel>>,
    first_sync_done: AtomicBool,
    /// Held for the duration of one sync
    sync: tokio::sync::Mutex<()>,
}

impl ModelTracker {
    pub fn new(client: Arc<dyn RepositoryClient>) -> Self {
        Self {
            base: TrackerBase::new(MODEL_TRACKER_CORE, TrackerKind::Model),
            client,
            models: RwLock::new(HashMap::new()),
            first_sync_done: AtomicBool::new(false),
            sync: tokio::sync::Mutex::new(()),
        }
    }

    pub fn has_models(&self) -> bool {
        !self
            .models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    pub fn model_count(&self) -> usize {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn model(&self, name: &QName) -> Option<DictionaryModel> {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Definition of a property in any loaded model.
    pub fn property(&self, name: &QName) -> Option<PropertyDefinition> {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find_map(|m| m.property(name).cloned())
    }

    /// Check every property of a node against its declared type.
    pub fn validate(&self, meta: &NodeMetaData) -> Result<(), String> {
        for (name, value) in &meta.properties {
            if let Some(def) = self.property(name) {
                if !def.data_type.accepts(value) {
                    return Err(format!(
                        "property {} expects {:?}, got {}",
                        name,
                        def.data_type,
                        value.to_index_string()
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn is_first_sync_done(&self) -> bool {
        self.first_sync_done.load(Ordering::SeqCst)
    }

    /// Run a full model sync once.
    ///
    /// Later calls are no-ops. Unlike a scheduled cycle this waits for a
    /// sync that is already running instead of skipping.
    pub async fn ensure_first_model_sync(&self) -> Result<(), TrackerError> {
        if self.is_first_sync_done() {
            return Ok(());
        }
        let synced = async {
            self.base.current_state(|| self.load_state())?;
            self.sync_models().await
        }
        .await;
        synced.map_err(|e| TrackerError::ModelsUnavailable(e.to_string()))?;
        if !self.has_models() {
            return Err(TrackerError::ModelsUnavailable(
                "repository returned no models".to_string(),
            ));
        }
        self.first_sync_done.store(true, Ordering::SeqCst);
        info!(models = self.model_count(), "First model sync complete");
        Ok(())
    }

    /// Load every model changed since the last sync.
    async fn sync_models(&self) -> Result<(), TrackerError> {
        let _sync = self.sync.lock().await;
        self.base.check_shutdown()?;
        let since = self.base.update_state(|s| s.last_indexed_id)?;
        let changed = self.client.get_models(since).await?;
        if changed.is_empty() {
            return Ok(());
        }

        let mut newest = since;
        {
            let mut models = self.models.write().unwrap_or_else(PoisonError::into_inner);
            for model in changed {
                newest = newest.max(model.timestamp_ms);
                info!(model = %model.name, timestamp = model.timestamp_ms, "Loaded model");
                models.insert(model.name.clone(), model);
            }
        }
        self.base.update_state(|s| s.advance(newest, newest))?;
        Ok(())
    }
}

#[async_trait]
impl Tracker for ModelTracker {
    fn base(&self) -> &TrackerBase {
        &self.base
    }

    async fn do_track(&self) -> Result<(), TrackerError> {
        self.sync_models().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockRepositoryClient;
    use std::time::Duration;
    use tracker_types::{DataType, PropertyValue};

    fn client_with_model() -> Arc<MockRepositoryClient> {
        let client = Arc::new(MockRepositoryClient::new());
        client.add_model(
            DictionaryModel::new("cm:contentmodel", 100)
                .with_property("cm:name", DataType::Text)
                .with_property("cm:size", DataType::Long),
        );
        client
    }

    #[tokio::test]
    async fn test_first_sync_loads_models() {
        let client = client_with_model();
        let tracker = ModelTracker::new(client.clone());
        assert!(!tracker.has_models());

        tracker.ensure_first_model_sync().await.unwrap();
        assert!(tracker.has_models());
        assert!(tracker.is_first_sync_done());
        assert_eq!(tracker.state_snapshot().unwrap().last_indexed_id, 100);

        let calls = client.call_count();
        tracker.ensure_first_model_sync().await.unwrap();
        assert_eq!(client.call_count(), calls);
    }

    #[tokio::test]
    async fn test_newer_model_replaces_older() {
        let client = client_with_model();
        let tracker = ModelTracker::new(client.clone());
        tracker.track().await.unwrap();

        client.add_model(
            DictionaryModel::new("cm:contentmodel", 200).with_property("cm:title", DataType::Text),
        );
        tracker.track().await.unwrap();

        let model = tracker.model(&QName::from("cm:contentmodel")).unwrap();
        assert_eq!(model.timestamp_ms, 200);
        assert_eq!(tracker.model_count(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_repository_fails_first_sync() {
        let client = client_with_model();
        client.set_unavailable(true);
        let tracker = ModelTracker::new(client.clone());
        let err = tracker.ensure_first_model_sync().await.unwrap_err();
        assert!(matches!(err, TrackerError::ModelsUnavailable(_)));
        assert!(!tracker.is_first_sync_done());
        assert!(!tracker.is_in_rollback());

        client.set_unavailable(false);
        tracker.ensure_first_model_sync().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_first_sync_waits_for_running_cycle() {
        let client = client_with_model();
        client.set_latency(Duration::from_millis(200));
        let tracker = Arc::new(ModelTracker::new(client.clone()));

        let scheduled = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.track().await })
        };
        while !tracker.base().is_running() {
            tokio::task::yield_now().await;
        }

        tracker.ensure_first_model_sync().await.unwrap();
        assert!(tracker.has_models());
        assert!(tracker.is_first_sync_done());
        scheduled.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_validate_property_types() {
        let tracker = ModelTracker::new(client_with_model());
        tracker.ensure_first_model_sync().await.unwrap();

        let good = NodeMetaData::new(1, 1, 1, "n1")
            .with_property("cm:name", PropertyValue::text("doc"))
            .with_property("x:undeclared", PropertyValue::Boolean(true));
        assert!(tracker.validate(&good).is_ok());

        let bad = NodeMetaData::new(2, 1, 1, "n2").with_property("cm:size", PropertyValue::text("big"));
        let reason = tracker.validate(&bad).unwrap_err();
        assert!(reason.contains("cm:size"));
        assert_eq!(
            tracker.property(&QName::from("cm:size")).unwrap().data_type,
            DataType::Long
        );
    }
}
