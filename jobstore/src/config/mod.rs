//! Runtime configuration.
//!
//! Values come from the environment (a `.env` file is loaded by the binary)
//! and fall back to defaults. A value that does not parse is reported and
//! ignored.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::importer::ImporterConfig;
use crate::worker::{InsertMode, StartWorkerConfig};

pub const DEFAULT_DATABASE_URL: &str = "sqlite:jobstore.db?mode=rwc";

/// Default seconds between cache-to-durable sweeps.
pub const DEFAULT_COMMIT_INTERVAL_SECS: u64 = 120;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStoreConfig {
    pub database_url: String,
    pub start_worker: StartWorkerConfig,
    /// Seconds between periodic syncs; `0` disables the commit service.
    pub commit_interval_secs: u64,
    pub importer: ImporterConfig,
    /// Directory for rolling log files. Console only when unset.
    pub log_dir: Option<String>,
}

impl Default for JobStoreConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            start_worker: StartWorkerConfig::default(),
            commit_interval_secs: DEFAULT_COMMIT_INTERVAL_SECS,
            importer: ImporterConfig::default(),
            log_dir: None,
        }
    }
}

impl JobStoreConfig {
    /// Load from environment variables, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `DATABASE_URL`
    /// - `JOBSTORE_INSERT_MODE` (`cache` or `durable`)
    /// - `JOBSTORE_START_QUEUE_CAPACITY`
    /// - `JOBSTORE_COMMIT_INTERVAL` (seconds)
    /// - `JOBSTORE_IMPORT_BATCH_SIZE`
    /// - `JOBSTORE_LOG_DIR`
    pub fn from_env_or_default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env_or_default`](Self::from_env_or_default) with a
    /// custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("DATABASE_URL") {
            config.database_url = url;
        }

        if let Some(mode) = get("JOBSTORE_INSERT_MODE") {
            match mode.trim().parse::<InsertMode>() {
                Ok(mode) => config.start_worker.insert_mode = mode,
                Err(_) => warn!(value = %mode, "Invalid JOBSTORE_INSERT_MODE, using default"),
            }
        }

        if let Some(capacity) = get("JOBSTORE_START_QUEUE_CAPACITY") {
            match capacity.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.start_worker.queue_capacity = n,
                _ => warn!(value = %capacity, "Invalid JOBSTORE_START_QUEUE_CAPACITY, using default"),
            }
        }

        if let Some(interval) = get("JOBSTORE_COMMIT_INTERVAL") {
            match interval.trim().parse::<u64>() {
                Ok(secs) => config.commit_interval_secs = secs,
                Err(_) => warn!(value = %interval, "Invalid JOBSTORE_COMMIT_INTERVAL, using default"),
            }
        }

        if let Some(batch) = get("JOBSTORE_IMPORT_BATCH_SIZE") {
            match batch.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.importer.batch_size = n,
                _ => warn!(value = %batch, "Invalid JOBSTORE_IMPORT_BATCH_SIZE, using default"),
            }
        }

        if let Some(dir) = get("JOBSTORE_LOG_DIR") {
            config.log_dir = Some(dir);
        }

        config
    }

    pub fn commit_interval(&self) -> Duration {
        Duration::from_secs(self.commit_interval_secs)
    }
}
