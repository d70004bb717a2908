//! Scheduler core - the job lifecycle state machine over the shared store.
//!
//! Split across submodules, one per lifecycle operation family:
//!
//! - `trigger`: entry point reacting to upstream package changes
//! - `update`: `create_or_update`, the single write path for job records
//! - `lock`: worker-facing `lock_available`
//! - `complete`: worker-facing completion bookkeeping
//! - `maintenance`: stale-lease sweep, idle check, runtime-version GC
//! - `stats`: per-service snapshots, failing-package tracking, ETA

mod complete;
mod lock;
mod maintenance;
mod stats;
mod trigger;
mod update;

pub use stats::{BucketStats, ServiceStats};

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use slatedb::{Db, DBTransaction};
use thiserror::Error;

use crate::catalog::{CatalogError, PackageCatalog, PopularityOracle};
use crate::job::Job;
use crate::keys::index_key;
use crate::settings::AppConfig;
use crate::storage::resolve_object_store;
use stats::StatsSnapshot;

/// Get current epoch time in milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Storage(#[from] crate::storage::StorageError),
    #[error(transparent)]
    Slate(#[from] slatedb::Error),
    #[error("json codec error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("job not found: {0}")]
    JobNotFound(String),
    #[error("transaction conflict during {0}, exceeded max retries")]
    TransactionConflict(String),
}

/// The scheduler over the shared job table. Owns the SlateDB instance.
///
/// Every instance is pinned to one runtime version; all queries filter by it
/// and all writes tag it, so concurrent deployments never touch each other's
/// jobs. Any number of instances across processes may point at the same
/// store - mutations go through optimistic transactions with re-validated
/// preconditions, so concurrent transitions never clobber one another.
pub struct JobScheduler {
    runtime_version: String,
    gc_before_runtime_version: String,
    pub(crate) db: Arc<Db>,
    pub(crate) catalog: Arc<dyn PackageCatalog>,
    pub(crate) popularity: Arc<dyn PopularityOracle>,
    /// Per-service ring of recent stats snapshots, in-process only.
    pub(crate) stats_history: Mutex<HashMap<crate::job::JobService, VecDeque<StatsSnapshot>>>,
}

impl JobScheduler {
    pub async fn open(
        cfg: &AppConfig,
        catalog: Arc<dyn PackageCatalog>,
        popularity: Arc<dyn PopularityOracle>,
    ) -> Result<Arc<Self>, SchedulerError> {
        let resolved = resolve_object_store(&cfg.database.backend, &cfg.database.path)?;

        let mut db_builder =
            slatedb::DbBuilder::new(resolved.canonical_path.as_str(), resolved.store);
        if let Some(flush_ms) = cfg.database.flush_interval_ms {
            let settings = slatedb::config::Settings {
                flush_interval: Some(Duration::from_millis(flush_ms)),
                ..Default::default()
            };
            db_builder = db_builder.with_settings(settings);
        }
        let db = Arc::new(db_builder.build().await?);

        Ok(Arc::new(Self {
            runtime_version: cfg.runtime_version.clone(),
            gc_before_runtime_version: cfg.gc_before_runtime_version.clone(),
            db,
            catalog,
            popularity,
            stats_history: Mutex::new(HashMap::new()),
        }))
    }

    /// Close the underlying SlateDB instance gracefully.
    pub async fn close(&self) -> Result<(), SchedulerError> {
        self.db.close().await?;
        Ok(())
    }

    pub fn runtime_version(&self) -> &str {
        &self.runtime_version
    }

    pub(crate) fn gc_before_runtime_version(&self) -> &str {
        &self.gc_before_runtime_version
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Fetch a job record by identity at this scheduler's runtime version.
    pub async fn get_job(
        &self,
        service: crate::job::JobService,
        package: &str,
        version: &str,
    ) -> Result<Option<Job>, SchedulerError> {
        let key = crate::keys::job_key(&self.runtime_version, service, package, version);
        match self.db.get(key.as_bytes()).await? {
            Some(raw) => Ok(Some(decode_job(&raw)?)),
            None => Ok(None),
        }
    }
}

pub(crate) fn decode_job(raw: &[u8]) -> Result<Job, SchedulerError> {
    Ok(serde_json::from_slice(raw)?)
}

pub(crate) fn encode_job(job: &Job) -> Result<Vec<u8>, SchedulerError> {
    Ok(serde_json::to_vec(job)?)
}

/// Read a job from within a transaction snapshot.
pub(crate) async fn txn_read_job(
    txn: &DBTransaction,
    key: &str,
) -> Result<Option<Job>, SchedulerError> {
    match txn.get(key).await? {
        Some(raw) => Ok(Some(decode_job(&raw)?)),
        None => Ok(None),
    }
}

/// Write a job and its state-index entry, retiring the previous entry.
///
/// Must run against the same transaction that read `old`; the commit-time
/// conflict check is what keeps the index consistent with the record.
pub(crate) fn txn_write_job(
    txn: &DBTransaction,
    old: Option<&Job>,
    new: &Job,
) -> Result<(), SchedulerError> {
    if let Some(old) = old {
        let old_idx = index_key(old);
        if old_idx != index_key(new) {
            txn.delete(&old_idx)?;
        }
    }
    txn.put(&new.key(), &encode_job(new)?)?;
    txn.put(&index_key(new), [])?;
    Ok(())
}
