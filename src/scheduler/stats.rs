//! Per-service job table statistics.
//!
//! `stats` streams every job of a `(runtime version, service)` pair into a
//! snapshot bucketed three ways, remembers recent snapshots in an in-process
//! ring, and derives a human-readable ETA from the drain rate between
//! consecutive snapshots.

use std::collections::BTreeSet;

use serde::Serialize;
use slatedb::DbIterator;

use crate::job::{Job, JobService, JobState, LastStatus};
use crate::keys::{end_bound, service_prefix};
use crate::scheduler::{JobScheduler, SchedulerError, decode_job, now_epoch_ms};

/// Window for the "recently updated" bucket.
const RECENT_WINDOW_MS: i64 = 90 * 24 * 60 * 60 * 1000;
/// How long snapshots stay in the in-process ring.
const RING_WINDOW_MS: i64 = 90 * 60 * 1000;

/// Counts per state and per last status over one set of jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BucketStats {
    pub total: u64,
    pub available: u64,
    pub processing: u64,
    pub idle: u64,
    pub none: u64,
    pub success: u64,
    pub failed: u64,
    pub aborted: u64,
}

impl BucketStats {
    fn record(&mut self, job: &Job) {
        self.total += 1;
        match job.state {
            JobState::Available => self.available += 1,
            JobState::Processing => self.processing += 1,
            JobState::Idle => self.idle += 1,
        }
        match job.last_status {
            LastStatus::None => self.none += 1,
            LastStatus::Success => self.success += 1,
            LastStatus::Failed => self.failed += 1,
            LastStatus::Aborted => self.aborted += 1,
        }
    }
}

/// One full stats pass over a service's job table.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub service: JobService,
    pub runtime_version: String,
    pub timestamp_ms: i64,
    /// Every job of the service.
    pub all: BucketStats,
    /// Only jobs for a package's latest stable version.
    pub latest: BucketStats,
    /// Only jobs whose source data changed in the last 90 days.
    pub last90: BucketStats,
    /// Packages with a failing recent job.
    pub failed_packages: BTreeSet<String>,
    /// Drain-rate estimate derived from the previous snapshot.
    pub eta: String,
}

/// Ring entry: just enough of a snapshot to compute the next ETA.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StatsSnapshot {
    pub(crate) timestamp_ms: i64,
    pub(crate) available: u64,
}

impl JobScheduler {
    /// Scan the service's job table and produce a stats snapshot.
    ///
    /// Concurrent calls within one process are safe; the ring is mutex
    /// guarded. Jobs that fail to decode are logged and skipped so one bad
    /// record cannot blind the operators.
    pub async fn stats(&self, service: JobService) -> Result<ServiceStats, SchedulerError> {
        let prefix = service_prefix(self.runtime_version(), service);
        let start = prefix.clone().into_bytes();
        let end = end_bound(&prefix);
        let mut iter: DbIterator = self.db.scan::<Vec<u8>, _>(start..end).await?;

        let now_ms = now_epoch_ms();
        let mut all = BucketStats::default();
        let mut latest = BucketStats::default();
        let mut last90 = BucketStats::default();
        let mut failed_packages = BTreeSet::new();

        while let Some(kv) = iter.next().await? {
            let job = match decode_job(&kv.value) {
                Ok(job) => job,
                Err(e) => {
                    tracing::warn!(
                        key = %String::from_utf8_lossy(&kv.key),
                        error = %e,
                        "stats: undecodable job record, skipping"
                    );
                    continue;
                }
            };
            all.record(&job);
            if job.is_latest_stable {
                latest.record(&job);
            }
            if now_ms - job.package_version_updated_ms <= RECENT_WINDOW_MS {
                last90.record(&job);
                if job.last_status == LastStatus::Failed {
                    failed_packages.insert(job.package_name.clone());
                }
            }
        }

        let eta = {
            let mut history = self
                .stats_history
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let ring = history.entry(service).or_default();
            let eta = match ring.back() {
                None => "no data".to_string(),
                Some(prev) => eta_message(prev, now_ms, all.available),
            };
            ring.push_back(StatsSnapshot {
                timestamp_ms: now_ms,
                available: all.available,
            });
            while ring
                .front()
                .is_some_and(|s| s.timestamp_ms < now_ms - RING_WINDOW_MS)
            {
                ring.pop_front();
            }
            eta
        };

        Ok(ServiceStats {
            service,
            runtime_version: self.runtime_version().to_string(),
            timestamp_ms: now_ms,
            all,
            latest,
            last90,
            failed_packages,
            eta,
        })
    }
}

/// Estimate the queue drain rate between two snapshots.
pub(crate) fn eta_message(prev: &StatsSnapshot, now_ms: i64, available: u64) -> String {
    let done = prev.available as i64 - available as i64;
    if done < 0 {
        return "increasing".to_string();
    }
    let delta_ms = now_ms - prev.timestamp_ms;
    if done == 0 || delta_ms <= 0 {
        return "no change".to_string();
    }
    let jobs_per_minute = done as f64 * 60_000.0 / delta_ms as f64;
    let remaining_ms = (delta_ms as f64 / done as f64 * available as f64).round() as i64;
    format!(
        "{:.2} jobs/minute, ~{} remaining",
        jobs_per_minute,
        format_remaining(remaining_ms)
    )
}

/// Coarse duration rendering for operator output: the two largest units.
fn format_remaining(ms: i64) -> String {
    let secs = (ms / 1000).max(0);
    let (days, rem) = (secs / 86_400, secs % 86_400);
    let (hours, rem) = (rem / 3_600, rem % 3_600);
    let (mins, secs) = (rem / 60, rem % 60);
    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, mins)
    } else if mins > 0 && secs > 0 {
        format!("{}m {}s", mins, secs)
    } else if mins > 0 {
        format!("{}m", mins)
    } else {
        format!("{}s", secs)
    }
}
