//! Error types for the scheduler crate.

use thiserror::Error;
use tokio_cron_scheduler::JobSchedulerError;

/// Errors that can occur during scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Error from the underlying tokio-cron-scheduler
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// A tracker schedule that tokio-cron-scheduler rejects
    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),

    /// Configured timezone is not an IANA name
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    /// No job is registered for the tracker and core
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// `start` called twice
    #[error("Scheduler is already running")]
    AlreadyRunning,

    /// Stopped twice, or a tracker scheduled after shutdown
    #[error("Scheduler is not running")]
    NotRunning,
}

impl From<JobSchedulerError> for SchedulerError {
    fn from(err: JobSchedulerError) -> Self {
        SchedulerError::Scheduler(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchedulerError::InvalidCron("*/x".to_string());
        assert_eq!(err.to_string(), "Invalid cron expression: */x");

        let err = SchedulerError::JobNotFound("MetadataTracker-alfresco".to_string());
        assert!(err.to_string().contains("MetadataTracker-alfresco"));

        assert!(SchedulerError::AlreadyRunning
            .to_string()
            .contains("already running"));
        assert!(SchedulerError::NotRunning.to_string().contains("not running"));
    }
}
