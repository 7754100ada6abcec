//! Scheduler configuration.

use serde::{Deserialize, Serialize};
use tracker_types::TrackerSettings;

use crate::SchedulerError;

/// Configuration for the scheduler service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// IANA timezone in which cron expressions are evaluated
    #[serde(default = "default_timezone")]
    pub default_timezone: String,

    /// Time given to running cycles to notice shutdown before the
    /// scheduler stops
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Maximum random delay before each scheduled cycle
    #[serde(default)]
    pub jitter_secs: u64,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_timezone: default_timezone(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            jitter_secs: 0,
        }
    }
}

impl SchedulerConfig {
    /// Scheduler settings carried by the tracker settings.
    pub fn from_settings(settings: &TrackerSettings) -> Self {
        Self {
            default_timezone: settings.timezone.clone(),
            jitter_secs: settings.jitter_secs,
            ..Self::default()
        }
    }

    pub fn parse_timezone(&self) -> Result<chrono_tz::Tz, SchedulerError> {
        self.default_timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| SchedulerError::InvalidTimezone(self.default_timezone.clone()))
    }
}
