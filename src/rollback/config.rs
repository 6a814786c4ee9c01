//! Rollback configuration
//!
//! Loaded from a JSON file; every field has a default, so `{}` is a valid
//! configuration. Immutable once a rollback starts.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(String),

    #[error("Invalid config JSON: {0}")]
    Parse(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Role of this node in a sharded cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterRole {
    /// Plain replica set member
    #[default]
    #[serde(rename = "none")]
    None,
    /// Shard server
    #[serde(rename = "shardsvr")]
    ShardServer,
    /// Config server
    #[serde(rename = "configsvr")]
    ConfigServer,
}

/// Rollback configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackConfig {
    /// Largest local oplog entry rollback will process (default 512 MiB)
    #[serde(default = "default_max_oplog_entry_bytes")]
    pub max_oplog_entry_bytes: u64,

    /// Cap on the cumulative size of refetched documents (default 300 MiB)
    #[serde(default = "default_max_refetch_bytes")]
    pub max_refetch_bytes: u64,

    /// Backoff after a recoverable failure (default 5s)
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,

    /// Whether majority read concern is enabled (default true).
    ///
    /// When disabled, fix-up switches the storage engine to unstable
    /// checkpoints and corrects the stable and initial data timestamps.
    #[serde(default = "default_true")]
    pub enable_majority_read_concern: bool,

    /// Write rollback data files for removed documents (default false)
    #[serde(default)]
    pub create_rollback_data_files: bool,

    /// Directory for rollback data files
    #[serde(default = "default_rollback_data_dir")]
    pub rollback_data_dir: PathBuf,

    /// Cluster role (default none)
    #[serde(default)]
    pub cluster_role: ClusterRole,

    /// Poll interval while a hang fail point is enabled (default 1000ms)
    #[serde(default = "default_fail_point_poll_interval_ms")]
    pub fail_point_poll_interval_ms: u64,

    /// Interval between document fix-up progress lines (default 10s)
    #[serde(default = "default_progress_log_interval_secs")]
    pub progress_log_interval_secs: u64,

    /// Capped `_id` lookups slower than this are reported (default 200ms)
    #[serde(default = "default_slow_capped_find_warn_ms")]
    pub slow_capped_find_warn_ms: u64,
}

fn default_max_oplog_entry_bytes() -> u64 {
    512 * 1024 * 1024
}
fn default_max_refetch_bytes() -> u64 {
    300 * 1024 * 1024
}
fn default_retry_backoff_secs() -> u64 {
    5
}
fn default_true() -> bool {
    true
}
fn default_rollback_data_dir() -> PathBuf {
    PathBuf::from("./rollback")
}
fn default_fail_point_poll_interval_ms() -> u64 {
    1000
}
fn default_progress_log_interval_secs() -> u64 {
    10
}
fn default_slow_capped_find_warn_ms() -> u64 {
    200
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            max_oplog_entry_bytes: default_max_oplog_entry_bytes(),
            max_refetch_bytes: default_max_refetch_bytes(),
            retry_backoff_secs: default_retry_backoff_secs(),
            enable_majority_read_concern: true,
            create_rollback_data_files: false,
            rollback_data_dir: default_rollback_data_dir(),
            cluster_role: ClusterRole::None,
            fail_point_poll_interval_ms: default_fail_point_poll_interval_ms(),
            progress_log_interval_secs: default_progress_log_interval_secs(),
            slow_capped_find_warn_ms: default_slow_capped_find_warn_ms(),
        }
    }
}

impl RollbackConfig {
    /// Load configuration from a JSON file and validate it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: RollbackConfig =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_oplog_entry_bytes == 0 {
            return Err(ConfigError::Invalid("max_oplog_entry_bytes must be > 0".into()));
        }
        if self.max_refetch_bytes == 0 {
            return Err(ConfigError::Invalid("max_refetch_bytes must be > 0".into()));
        }
        if self.fail_point_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("fail_point_poll_interval_ms must be > 0".into()));
        }
        if self.progress_log_interval_secs == 0 {
            return Err(ConfigError::Invalid("progress_log_interval_secs must be > 0".into()));
        }
        if self.create_rollback_data_files && self.rollback_data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "rollback_data_dir is required when create_rollback_data_files is set".into(),
            ));
        }
        Ok(())
    }

    pub fn fail_point_poll_interval(&self) -> Duration {
        Duration::from_millis(self.fail_point_poll_interval_ms)
    }

    pub fn progress_log_interval(&self) -> Duration {
        Duration::from_secs(self.progress_log_interval_secs)
    }

    pub fn slow_capped_find_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_capped_find_warn_ms)
    }
}
