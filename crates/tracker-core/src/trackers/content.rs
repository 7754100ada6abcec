//! Content tracker: fills the text of nodes whose content changed.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use tracker_cache::ContentCache;
use tracker_search::{ContentStatus, DocType, IndexDocument, IndexFacade, Predicate};
use tracker_types::{BatchSettings, TrackerKind};

use super::{cache_document, cached_document, ModelTracker};
use crate::client::RepositoryClient;
use crate::error::{RepositoryError, TrackerError};
use crate::tracker::{Tracker, TrackerBase};

pub struct ContentTracker {
    base: TrackerBase,
    client: Arc<dyn RepositoryClient>,
    facade: Arc<dyn IndexFacade>,
    cache: Arc<ContentCache>,
    models: Arc<ModelTracker>,
    batch: BatchSettings,
}

impl ContentTracker {
    pub fn new(
        core: impl Into<String>,
        client: Arc<dyn RepositoryClient>,
        facade: Arc<dyn IndexFacade>,
        cache: Arc<ContentCache>,
        models: Arc<ModelTracker>,
        batch: BatchSettings,
    ) -> Self {
        Self {
            base: TrackerBase::new(core, TrackerKind::Content),
            client,
            facade,
            cache,
            models,
            batch,
        }
    }

    /// Committed node documents still waiting for their content.
    pub fn dirty_documents(&self, limit: usize) -> Result<Vec<IndexDocument>, TrackerError> {
        let predicate = Predicate::and([
            Predicate::DocType(DocType::Node),
            Predicate::ContentStatus(ContentStatus::Dirty),
        ]);
        Ok(self.facade.search(&predicate, limit)?)
    }

    /// Merge fetched content into a dirty document. Returns whether the
    /// document was updated.
    async fn update_content(&self, indexed: &IndexDocument) -> Result<bool, TrackerError> {
        let Some(dbid) = indexed.dbid else {
            return Ok(false);
        };
        let mut doc = match cached_document(&self.cache, &indexed.tenant, dbid)? {
            // Newer metadata is pending commit; it will come back dirty
            Some(cached) if cached.txid != indexed.txid => return Ok(false),
            Some(cached) if cached.content_status == Some(ContentStatus::Dirty) => cached,
            // The cache outlives rollbacks, so a clean copy may hold a fill
            // the index discarded. The committed document decides.
            _ => indexed.clone(),
        };
        if indexed.content_status != Some(ContentStatus::Dirty) {
            return Ok(false);
        }

        match self.client.get_text_content(dbid).await {
            Ok(Some(text)) if !text.is_empty() => {
                doc.text = if doc.text.is_empty() {
                    text
                } else {
                    format!("{} {}", doc.text, text)
                };
            }
            Ok(_) => {}
            Err(RepositoryError::Entity { reason, .. }) => {
                warn!(core = %self.base.core_name(), node = dbid, %reason, "Content could not be fetched");
                doc.error = Some(reason);
            }
            Err(e) => return Err(e.into()),
        }
        doc.content_status = Some(ContentStatus::Clean);

        self.facade.add_or_update(&doc)?;
        cache_document(&self.cache, &doc)?;
        Ok(true)
    }
}

#[async_trait]
impl Tracker for ContentTracker {
    fn base(&self) -> &TrackerBase {
        &self.base
    }

    fn ready(&self) -> bool {
        self.models.has_models()
    }

    async fn do_track(&self) -> Result<(), TrackerError> {
        let dirty = self.dirty_documents(self.batch.content_update_batch_size)?;
        if dirty.is_empty() {
            debug!(core = %self.base.core_name(), "No content to update");
            return Ok(());
        }

        let mut updated = 0;
        for chunk in dirty.chunks(self.batch.node_batch_size.max(1)) {
            self.base.check_shutdown()?;
            let _write = self.base.write_lock().lock().await;
            let result = async {
                let mut count = 0;
                for doc in chunk {
                    if self.update_content(doc).await? {
                        count += 1;
                    }
                }
                Ok::<_, TrackerError>(count)
            }
            .await;
            updated += self.base.guard(result)?;
        }

        info!(core = %self.base.core_name(), candidates = dirty.len(), updated, "Content tracker cycle done");
        Ok(())
    }
}
