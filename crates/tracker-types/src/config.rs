//! Configuration loading for the trackers.
//!
//! Layered config: defaults -> config file -> env vars.
//! The default config file lives at `<config dir>/repo-tracker/tracker.toml`.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::TrackerTypesError;
use crate::state::TrackerKind;

/// Cron used by every tracker unless overridden: every 15 seconds.
pub const DEFAULT_CRON: &str = "*/15 * * * * *";

/// Batch sizes bounding the work done per cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSettings {
    /// Transactions fetched per metadata cycle
    #[serde(default = "default_transactions_per_cycle")]
    pub transactions_per_cycle: usize,

    /// Nodes whose metadata is fetched in one repository call
    #[serde(default = "default_node_batch_size")]
    pub node_batch_size: usize,

    /// ACL change sets fetched per ACL cycle
    #[serde(default = "default_acl_change_sets_per_cycle")]
    pub acl_change_sets_per_cycle: usize,

    /// ACLs resolved per batch
    #[serde(default = "default_acl_batch_size")]
    pub acl_batch_size: usize,

    /// Documents with outdated content handled per content cycle
    #[serde(default = "default_content_update_batch_size")]
    pub content_update_batch_size: usize,

    /// Descendants re-derived per cascade batch
    #[serde(default = "default_cascade_node_batch_size")]
    pub cascade_node_batch_size: usize,

    /// Transactions with pending cascades handled per cascade cycle
    #[serde(default = "default_cascade_transactions_per_cycle")]
    pub cascade_transactions_per_cycle: usize,

    /// Concurrent batches per tracker
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
}

fn default_transactions_per_cycle() -> usize {
    2000
}

fn default_node_batch_size() -> usize {
    50
}

fn default_acl_change_sets_per_cycle() -> usize {
    2000
}

fn default_acl_batch_size() -> usize {
    100
}

fn default_content_update_batch_size() -> usize {
    2000
}

fn default_cascade_node_batch_size() -> usize {
    10
}

fn default_cascade_transactions_per_cycle() -> usize {
    50
}

fn default_parallelism() -> usize {
    4
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            transactions_per_cycle: default_transactions_per_cycle(),
            node_batch_size: default_node_batch_size(),
            acl_change_sets_per_cycle: default_acl_change_sets_per_cycle(),
            acl_batch_size: default_acl_batch_size(),
            content_update_batch_size: default_content_update_batch_size(),
            cascade_node_batch_size: default_cascade_node_batch_size(),
            cascade_transactions_per_cycle: default_cascade_transactions_per_cycle(),
            parallelism: default_parallelism(),
        }
    }
}

/// Per-tracker cron expressions (6-field: sec min hour day month weekday).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronSettings {
    /// Fallback for trackers without an explicit expression
    #[serde(default = "default_cron")]
    pub default: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub acl: Option<String>,
    #[serde(default)]
    pub metadata: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub cascade: Option<String>,
    #[serde(default)]
    pub commit: Option<String>,
}

fn default_cron() -> String {
    DEFAULT_CRON.to_string()
}

impl CronSettings {
    /// Cron expression for the given tracker kind.
    pub fn for_kind(&self, kind: TrackerKind) -> &str {
        let specific = match kind {
            TrackerKind::Model => &self.model,
            TrackerKind::Acl => &self.acl,
            TrackerKind::Metadata => &self.metadata,
            TrackerKind::Content => &self.content,
            TrackerKind::Cascade => &self.cascade,
            TrackerKind::Commit => &self.commit,
        };
        match specific.as_deref() {
            Some(expr) => expr,
            None if self.default.is_empty() => DEFAULT_CRON,
            None => &self.default,
        }
    }
}

/// Tracking subsystem settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerSettings {
    /// Directory of the search index
    #[serde(default = "default_index_path")]
    pub index_path: String,

    /// Root directory of the content cache
    #[serde(default = "default_content_store_path")]
    pub content_store_path: String,

    #[serde(default)]
    pub batch: BatchSettings,

    /// Minimum time between two commits (milliseconds)
    #[serde(default = "default_commit_interval_ms")]
    pub commit_interval_ms: u64,

    #[serde(default = "default_true")]
    pub cascade_enabled: bool,

    #[serde(default = "default_true")]
    pub tracking_enabled: bool,

    #[serde(default)]
    pub cron: CronSettings,

    /// IANA timezone used to evaluate cron expressions
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Maximum random delay before a scheduled cycle (seconds)
    #[serde(default)]
    pub jitter_secs: u64,

    /// Memory budget of the index writer
    #[serde(default = "default_writer_memory_mb")]
    pub writer_memory_mb: usize,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_index_path() -> String {
    ProjectDirs::from("", "", "repo-tracker")
        .map(|p| p.data_local_dir().join("index").to_string_lossy().to_string())
        .unwrap_or_else(|| "./index".to_string())
}

fn default_content_store_path() -> String {
    ProjectDirs::from("", "", "repo-tracker")
        .map(|p| {
            p.data_local_dir()
                .join("contentstore")
                .to_string_lossy()
                .to_string()
        })
        .unwrap_or_else(|| "./contentstore".to_string())
}

fn default_commit_interval_ms() -> u64 {
    60_000
}

fn default_true() -> bool {
    true
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_writer_memory_mb() -> usize {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            index_path: default_index_path(),
            content_store_path: default_content_store_path(),
            batch: BatchSettings::default(),
            commit_interval_ms: default_commit_interval_ms(),
            cascade_enabled: true,
            tracking_enabled: true,
            cron: CronSettings {
                default: default_cron(),
                ..CronSettings::default()
            },
            timezone: default_timezone(),
            jitter_secs: 0,
            writer_memory_mb: default_writer_memory_mb(),
            log_level: default_log_level(),
        }
    }
}

impl TrackerSettings {
    /// Load settings with layered precedence.
    ///
    /// 1. Built-in defaults
    /// 2. Default config file (`tracker.toml` in the project config dir)
    /// 3. Explicitly requested config file
    /// 4. Environment variables (TRACKER__*), e.g. `TRACKER__BATCH__NODE_BATCH_SIZE`
    pub fn load(config_path: Option<&str>) -> Result<Self, TrackerTypesError> {
        let config_dir = ProjectDirs::from("", "", "repo-tracker")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let default_config_path = config_dir.join("tracker");

        let mut builder = Config::builder()
            .set_default("index_path", default_index_path())
            .map_err(|e| TrackerTypesError::Config(e.to_string()))?
            .set_default("content_store_path", default_content_store_path())
            .map_err(|e| TrackerTypesError::Config(e.to_string()))?
            .set_default("commit_interval_ms", default_commit_interval_ms() as i64)
            .map_err(|e| TrackerTypesError::Config(e.to_string()))?
            .set_default("cron.default", default_cron())
            .map_err(|e| TrackerTypesError::Config(e.to_string()))?
            .set_default("timezone", default_timezone())
            .map_err(|e| TrackerTypesError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| TrackerTypesError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("TRACKER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| TrackerTypesError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| TrackerTypesError::Config(e.to_string()))
    }

    pub fn cron_for(&self, kind: TrackerKind) -> &str {
        self.cron.for_kind(kind)
    }

    pub fn index_dir(&self) -> PathBuf {
        PathBuf::from(&self.index_path)
    }

    pub fn content_store_dir(&self) -> PathBuf {
        PathBuf::from(&self.content_store_path)
    }
}
