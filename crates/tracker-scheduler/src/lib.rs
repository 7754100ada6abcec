//! Cron scheduling for repository trackers.
//!
//! [`SchedulerService`] wraps `tokio-cron-scheduler` with timezone support
//! and graceful shutdown. [`TrackerScheduler`] runs one job per tracker and
//! core on top of it, records run status in a [`JobRegistry`], and cancels
//! jobs by tracker identity so that a reloading core never removes the jobs
//! of its replacement.

mod config;
mod error;
mod jitter;
mod registry;
mod service;
mod tracker_scheduler;

pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use jitter::JitterConfig;
pub use registry::{JobRegistry, JobResult, JobStatus};
pub use service::{validate_cron_expression, SchedulerService};
pub use tracker_scheduler::{job_name, TrackerScheduler};
