use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Log output format for the process.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// Version string of the worker code running this process. Jobs are
    /// partitioned by this value, so a deployment only sees its own jobs.
    /// Must sort lexicographically across releases (e.g. "2026.07.14").
    pub runtime_version: String,
    /// Jobs tagged with a runtime version strictly below this are
    /// garbage-collected by `delete_old_entries`.
    pub gc_before_runtime_version: String,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default)]
    pub worker: WorkerConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// How long a worker sleeps when `lock_available` finds nothing.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Interval between maintenance passes (stale-lease sweep, idle check,
    /// garbage collection, stats).
    #[serde(default = "default_maintenance_interval_ms")]
    pub maintenance_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            maintenance_interval_ms: default_maintenance_interval_ms(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_maintenance_interval_ms() -> u64 {
    15 * 60 * 1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub name: String,
    pub backend: Backend,
    pub path: String,
    /// Optional flush interval for SlateDB. If None, uses SlateDB's default.
    #[serde(default)]
    pub flush_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Fs,
    Memory,
    Url,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let default = Self {
            runtime_version: "1970.01.01".to_string(),
            gc_before_runtime_version: "1970.01.01".to_string(),
            log_format: LogFormat::default(),
            worker: WorkerConfig::default(),
            database: DatabaseConfig {
                name: "grist".to_string(),
                backend: Backend::Fs,
                path: "/tmp/grist".to_string(),
                flush_interval_ms: None,
            },
        };

        match path {
            Some(p) => {
                let data = fs::read_to_string(p)?;
                let cfg: Self = toml::from_str(&data)?;
                Ok(cfg)
            }
            None => Ok(default),
        }
    }
}
