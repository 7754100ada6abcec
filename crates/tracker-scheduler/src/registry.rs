//! Run status of scheduled tracker jobs.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tracker_types::TrackerKind;

use crate::tracker_scheduler::job_name;

/// Outcome of one scheduled tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobResult {
    Success,
    Failed(String),
    /// The tracker was not run, e.g. jobs are paused
    Skipped(String),
}

/// What operators see for one tracker job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_name: String,
    pub core: String,
    pub tracker: TrackerKind,
    pub cron_expr: String,
    /// End of the last tick that ran the tracker
    pub last_run: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub last_result: Option<JobResult>,
    /// Ticks that ran the tracker, failed ones included
    pub run_count: u64,
    pub error_count: u64,
    pub skip_count: u64,
    pub is_running: bool,
    pub is_paused: bool,
}

impl JobStatus {
    fn new(core: &str, tracker: TrackerKind, cron_expr: &str) -> Self {
        Self {
            job_name: job_name(core, tracker),
            core: core.to_string(),
            tracker,
            cron_expr: cron_expr.to_string(),
            last_run: None,
            last_duration_ms: None,
            last_result: None,
            run_count: 0,
            error_count: 0,
            skip_count: 0,
            is_running: false,
            is_paused: false,
        }
    }

    fn record(&mut self, result: JobResult, duration_ms: u64) {
        self.is_running = false;
        match &result {
            JobResult::Skipped(_) => self.skip_count += 1,
            outcome => {
                self.run_count += 1;
                if matches!(outcome, JobResult::Failed(_)) {
                    self.error_count += 1;
                }
                self.last_run = Some(Utc::now());
                self.last_duration_ms = Some(duration_ms);
            }
        }
        self.last_result = Some(result);
    }
}

/// Job statuses keyed by job name, iterated in name order.
pub struct JobRegistry {
    jobs: RwLock<BTreeMap<String, JobStatus>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(BTreeMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, JobStatus>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, JobStatus>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track the job of `tracker` on `core`, resetting any previous status.
    /// Returns the job name.
    pub fn register(&self, core: &str, tracker: TrackerKind, cron_expr: &str) -> String {
        let status = JobStatus::new(core, tracker, cron_expr);
        let name = status.job_name.clone();
        self.write().insert(name.clone(), status);
        name
    }

    pub fn unregister(&self, job_name: &str) -> Option<JobStatus> {
        self.write().remove(job_name)
    }

    pub fn record_start(&self, job_name: &str) {
        if let Some(status) = self.write().get_mut(job_name) {
            status.is_running = true;
        }
    }

    pub fn record_complete(&self, job_name: &str, result: JobResult, duration_ms: u64) {
        if let Some(status) = self.write().get_mut(job_name) {
            status.record(result, duration_ms);
        }
    }

    pub fn set_paused(&self, job_name: &str, paused: bool) {
        if let Some(status) = self.write().get_mut(job_name) {
            status.is_paused = paused;
        }
    }

    pub fn set_all_paused(&self, paused: bool) {
        for status in self.write().values_mut() {
            status.is_paused = paused;
        }
    }

    pub fn get_status(&self, job_name: &str) -> Option<JobStatus> {
        self.read().get(job_name).cloned()
    }

    pub fn get_all_status(&self) -> Vec<JobStatus> {
        self.read().values().cloned().collect()
    }

    /// Statuses of every job bound to `core`.
    pub fn core_status(&self, core: &str) -> Vec<JobStatus> {
        self.read()
            .values()
            .filter(|s| s.core == core)
            .cloned()
            .collect()
    }

    pub fn is_running(&self, job_name: &str) -> bool {
        self.read().get(job_name).is_some_and(|s| s.is_running)
    }

    pub fn is_paused(&self, job_name: &str) -> bool {
        self.read().get(job_name).is_some_and(|s| s.is_paused)
    }

    pub fn is_registered(&self, job_name: &str) -> bool {
        self.read().contains_key(job_name)
    }

    pub fn job_count(&self) -> usize {
        self.read().len()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}
