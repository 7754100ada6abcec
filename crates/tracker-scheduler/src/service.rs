//! Cron runtime wrapper around tokio-cron-scheduler.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono_tz::Tz;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{SchedulerConfig, SchedulerError};

/// Check a six-field cron expression (sec min hour day month weekday).
///
/// ```
/// use tracker_scheduler::validate_cron_expression;
///
/// assert!(validate_cron_expression("*/15 * * * * *").is_ok());
/// assert!(validate_cron_expression("every minute").is_err());
/// ```
pub fn validate_cron_expression(expr: &str) -> Result<(), SchedulerError> {
    match Job::new_async(expr, |_uuid, _lock| Box::pin(async {})) {
        Ok(_) => Ok(()),
        Err(e) => Err(SchedulerError::InvalidCron(format!("'{}': {}", expr, e))),
    }
}

/// Lifecycle wrapper around a [`JobScheduler`].
///
/// Jobs receive a clone of the shutdown token so running cycles can stop
/// between log entries.
pub struct SchedulerService {
    scheduler: JobScheduler,
    config: SchedulerConfig,
    timezone: Tz,
    shutdown_token: CancellationToken,
    is_running: AtomicBool,
}

impl SchedulerService {
    /// Create the service. Jobs run only after [`start`](Self::start).
    pub async fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let timezone = config.parse_timezone()?;
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler,
            config,
            timezone,
            shutdown_token: CancellationToken::new(),
            is_running: AtomicBool::new(false),
        })
    }

    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }
        self.scheduler.start().await?;
        info!("Scheduler started");
        Ok(())
    }

    /// Cancel the shutdown token, give running jobs the configured grace
    /// period, then stop the runtime.
    pub async fn shutdown(&mut self) -> Result<(), SchedulerError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(SchedulerError::NotRunning);
        }

        let grace = Duration::from_secs(self.config.shutdown_timeout_secs);
        info!(grace_secs = grace.as_secs(), "Stopping tracker scheduler");
        self.shutdown_token.cancel();
        if !grace.is_zero() {
            tokio::time::sleep(grace).await;
        }

        if let Err(e) = self.scheduler.shutdown().await {
            warn!(error = %e, "Cron runtime did not stop cleanly");
        }
        self.is_running.store(false, Ordering::SeqCst);
        info!("Tracker scheduler stopped");
        Ok(())
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Register `job_fn` to run on `cron_expr`, evaluated in the
    /// configured timezone. Returns the job's id.
    pub async fn add_cron_job<F, Fut>(
        &self,
        name: &str,
        cron_expr: &str,
        job_fn: F,
    ) -> Result<Uuid, SchedulerError>
    where
        F: Fn(CancellationToken) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        validate_cron_expression(cron_expr)?;
        let name = name.to_string();
        let token = self.shutdown_token.clone();

        let job = Job::new_async_tz(cron_expr, self.timezone, {
            let name = name.clone();
            move |_uuid, _lock| {
                let name = name.clone();
                let token = token.clone();
                let job_fn = job_fn.clone();
                Box::pin(async move {
                    let start = Instant::now();
                    job_fn(token).await;
                    debug!(job = %name, elapsed_ms = start.elapsed().as_millis(), "Cron tick handled");
                })
            }
        })
        .map_err(|e| SchedulerError::InvalidCron(format!("'{}': {}", cron_expr, e)))?;

        let uuid = self.scheduler.add(job).await?;
        info!(job = %name, %uuid, cron = cron_expr, timezone = %self.timezone.name(), "Cron job added");
        Ok(uuid)
    }

    /// Remove a job from the runtime. A cycle already running finishes.
    pub async fn remove_job(&self, uuid: &Uuid) -> Result<(), SchedulerError> {
        self.scheduler.remove(uuid).await?;
        debug!(uuid = %uuid, "Job removed");
        Ok(())
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }
}
