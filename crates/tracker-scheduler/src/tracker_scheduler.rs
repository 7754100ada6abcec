//! Periodic execution of trackers.
//!
//! Jobs are keyed by tracker class and core name, so a core has at most
//! one job per tracker kind. Each job remembers the tracker instance it
//! runs. Deleting a job for a tracker only succeeds if the job still runs
//! that exact instance: while a core reloads, the new core's trackers can
//! be scheduled under the same names before the old core shuts down, and
//! the old core's cleanup must leave them alone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tracker_core::{CoreTrackers, ModelTracker, Tracker, MODEL_TRACKER_CORE};
use tracker_types::{CronSettings, TrackerKind};

use crate::{JitterConfig, JobRegistry, JobResult, SchedulerConfig, SchedulerError, SchedulerService};

/// Name of the job running `kind` for `core`.
pub fn job_name(core: &str, kind: TrackerKind) -> String {
    format!("{}-{}", kind.class_name(), core)
}

struct ScheduledJob {
    uuid: Uuid,
    tracker: Arc<dyn Tracker>,
}

fn same_instance(a: &Arc<dyn Tracker>, b: &Arc<dyn Tracker>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

pub struct TrackerScheduler {
    service: SchedulerService,
    registry: Arc<JobRegistry>,
    jobs: Mutex<HashMap<String, ScheduledJob>>,
    jitter: JitterConfig,
    shut_down: AtomicBool,
}

impl TrackerScheduler {
    pub async fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let jitter = JitterConfig::new(config.jitter_secs);
        Ok(Self {
            service: SchedulerService::new(config).await?,
            registry: Arc::new(JobRegistry::new()),
            jobs: Mutex::new(HashMap::new()),
            jitter,
            shut_down: AtomicBool::new(false),
        })
    }

    pub async fn start(&self) -> Result<(), SchedulerError> {
        self.service.start().await
    }

    pub fn registry(&self) -> Arc<JobRegistry> {
        self.registry.clone()
    }

    /// Run `tracker` for `core` on `cron_expr`.
    ///
    /// A job already scheduled under the same name is replaced.
    pub async fn schedule(
        &self,
        tracker: Arc<dyn Tracker>,
        core: &str,
        cron_expr: &str,
    ) -> Result<Uuid, SchedulerError> {
        if self.is_shutdown() {
            return Err(SchedulerError::NotRunning);
        }
        let name = job_name(core, tracker.kind());
        let mut jobs = self.jobs.lock().await;
        if let Some(previous) = jobs.remove(&name) {
            info!(job = %name, "Replacing scheduled job");
            self.service.remove_job(&previous.uuid).await?;
        }

        self.registry.register(core, tracker.kind(), cron_expr);
        let job = {
            let name = name.clone();
            let tracker = tracker.clone();
            let registry = self.registry.clone();
            let jitter = self.jitter;
            move |token: CancellationToken| {
                let name = name.clone();
                let tracker = tracker.clone();
                let registry = registry.clone();
                async move { run_cycle(&name, tracker.as_ref(), &registry, jitter, token).await }
            }
        };
        let uuid = match self.service.add_cron_job(&name, cron_expr, job).await {
            Ok(uuid) => uuid,
            Err(e) => {
                self.registry.unregister(&name);
                return Err(e);
            }
        };
        jobs.insert(name, ScheduledJob { uuid, tracker });
        Ok(uuid)
    }

    /// Schedule every tracker of a core, plus the shared model tracker
    /// unless that exact instance is already scheduled.
    pub async fn schedule_core(
        &self,
        core: &CoreTrackers,
        models: Arc<ModelTracker>,
        cron: &CronSettings,
    ) -> Result<(), SchedulerError> {
        for tracker in core.all() {
            let kind = tracker.kind();
            self.schedule(tracker, core.core_name(), cron.for_kind(kind))
                .await?;
        }

        let models: Arc<dyn Tracker> = models;
        if !self.is_scheduled(MODEL_TRACKER_CORE, &models).await {
            self.schedule(models, MODEL_TRACKER_CORE, cron.for_kind(TrackerKind::Model))
                .await?;
        }
        info!(core = %core.core_name(), "Scheduled core trackers");
        Ok(())
    }

    /// Whether the job for this tracker's kind and `core` runs this
    /// exact tracker instance.
    pub async fn is_scheduled(&self, core: &str, tracker: &Arc<dyn Tracker>) -> bool {
        self.jobs
            .lock()
            .await
            .get(&job_name(core, tracker.kind()))
            .is_some_and(|job| same_instance(&job.tracker, tracker))
    }

    /// Cancel the job for `tracker` on `core` if, and only if, the job
    /// still runs this instance. Returns whether a job was removed.
    pub async fn delete_job_for_tracker_instance(
        &self,
        core: &str,
        tracker: &Arc<dyn Tracker>,
    ) -> Result<bool, SchedulerError> {
        let name = job_name(core, tracker.kind());
        let mut jobs = self.jobs.lock().await;
        match jobs.get(&name) {
            Some(job) if same_instance(&job.tracker, tracker) => {}
            Some(_) => {
                debug!(job = %name, "Job runs another tracker instance, keeping it");
                return Ok(false);
            }
            None => return Ok(false),
        }
        if let Some(job) = jobs.remove(&name) {
            self.service.remove_job(&job.uuid).await?;
            self.registry.unregister(&name);
            info!(job = %name, "Deleted tracker job");
        }
        Ok(true)
    }

    /// Identity-checked deletion for every tracker of a core.
    pub async fn delete_tracker_jobs(
        &self,
        core: &str,
        trackers: &[Arc<dyn Tracker>],
    ) -> Result<usize, SchedulerError> {
        let mut deleted = 0;
        for tracker in trackers {
            if self.delete_job_for_tracker_instance(core, tracker).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    pub async fn jobs_count(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Skip every cycle until [`resume_all`](Self::resume_all).
    pub fn pause_all(&self) {
        self.registry.set_all_paused(true);
        info!("Paused all tracker jobs");
    }

    /// Pause or resume the job of one tracker kind on `core`.
    pub fn set_paused(
        &self,
        core: &str,
        kind: TrackerKind,
        paused: bool,
    ) -> Result<(), SchedulerError> {
        let name = job_name(core, kind);
        if !self.registry.is_registered(&name) {
            return Err(SchedulerError::JobNotFound(name));
        }
        self.registry.set_paused(&name, paused);
        info!(job = %name, paused, "Changed tracker job pause state");
        Ok(())
    }

    pub fn resume_all(&self) {
        self.registry.set_all_paused(false);
        info!("Resumed all tracker jobs");
    }

    /// Stop the cron runtime. No job can be scheduled afterwards.
    pub async fn shutdown(&mut self) -> Result<(), SchedulerError> {
        self.shut_down.store(true, Ordering::SeqCst);
        self.jobs.lock().await.clear();
        if self.service.is_running() {
            self.service.shutdown().await?;
        }
        Ok(())
    }

    pub fn is_shutdown(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

async fn run_cycle(
    name: &str,
    tracker: &dyn Tracker,
    registry: &JobRegistry,
    jitter: JitterConfig,
    token: CancellationToken,
) {
    if token.is_cancelled() {
        return;
    }
    if registry.is_paused(name) {
        registry.record_complete(name, JobResult::Skipped("paused".to_string()), 0);
        return;
    }

    let delay = jitter.generate_jitter();
    if !delay.is_zero() {
        debug!(job = %name, jitter_ms = delay.as_millis(), "Applying jitter delay");
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    registry.record_start(name);
    let start = Instant::now();
    let result = match tracker.track().await {
        Ok(()) => JobResult::Success,
        Err(e) => {
            warn!(job = %name, error = %e, "Tracker cycle failed");
            JobResult::Failed(e.to_string())
        }
    };
    registry.record_complete(name, result, start.elapsed().as_millis() as u64);
}
