use serde::{Deserialize, Serialize};

use crate::keys::job_key;

/// One hour lease taken by `lock_available`.
pub const DEFAULT_LOCK_MS: i64 = 60 * 60 * 1000;
/// Cool-down for flaky jobs and freshly-current idle jobs.
pub const SHORT_EXTEND_MS: i64 = 12 * 60 * 60 * 1000;
/// Cool-down for healthy jobs and chronically failing ones.
pub const LONG_EXTEND_MS: i64 = 3 * 24 * 60 * 60 * 1000;
/// Cap on the per-failure hourly bump added to the cool-down.
pub const MAX_BACKOFF_HOURS: u32 = 168;

const HOUR_MS: i64 = 60 * 60 * 1000;

/// Category of background work. Workers pull one service at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobService {
    /// Static analysis of a package version.
    Analyzer,
    /// API documentation generation for a package version.
    Docgen,
}

impl JobService {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobService::Analyzer => "analyzer",
            JobService::Docgen => "docgen",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "analyzer" => Some(JobService::Analyzer),
            "docgen" => Some(JobService::Docgen),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job.
///
/// - `available`: eligible for pickup, unordered among equal priorities
/// - `processing`: leased by exactly one worker until `locked_until_ms`
/// - `idle`: cooling down or awaiting an external freshness signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Available,
    Processing,
    Idle,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Available => "available",
            JobState::Processing => "processing",
            JobState::Idle => "idle",
        }
    }
}

/// Outcome of the most recent terminal attempt, as stored on the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LastStatus {
    None,
    Success,
    Failed,
    Aborted,
}

/// Outcome a worker reports through `complete`. `Aborted` is also recorded by
/// the stale-lease sweep when a lease expires under a crashed worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Failed,
    Aborted,
}

impl JobOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, JobOutcome::Failed | JobOutcome::Aborted)
    }

    pub fn as_last_status(&self) -> LastStatus {
        match self {
            JobOutcome::Success => LastStatus::Success,
            JobOutcome::Failed => LastStatus::Failed,
            JobOutcome::Aborted => LastStatus::Aborted,
        }
    }
}

/// The sole persisted entity of the scheduler, JSON-encoded under
/// `jobs/<runtime_version>/<service>/<package>/<version>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Worker-code version this job belongs to. Never mutated after creation;
    /// queries only see the current version and old versions get collected.
    pub runtime_version: String,
    pub service: JobService,
    pub package_name: String,
    pub package_version: String,
    /// Whether this version is currently the package's latest stable.
    pub is_latest_stable: bool,
    /// High-water mark of the source data this job corresponds to (epoch ms).
    pub package_version_updated_ms: i64,
    pub state: JobState,
    /// Lease deadline (epoch ms). Meaning depends on `state`: for
    /// `processing` it fences the lease, for `idle` it gates re-activation,
    /// for `available` it is always None.
    pub locked_until_ms: Option<i64>,
    /// Unguessable token identifying one specific lease; fences `complete`.
    pub processing_key: Option<String>,
    pub last_status: LastStatus,
    /// Consecutive non-success attempts; reset to 0 on success.
    pub error_count: u32,
    /// Lower is more urgent. Recomputed on every mutation except
    /// idle-deadline extension.
    pub priority: i64,
}

impl Job {
    /// Deterministic URI-structured id, also the key suffix in the store.
    pub fn id(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.runtime_version, self.service, self.package_name, self.package_version
        )
    }

    pub fn key(&self) -> String {
        job_key(
            &self.runtime_version,
            self.service,
            &self.package_name,
            &self.package_version,
        )
    }
}

/// Neutral priority for a package nobody downloads.
pub const BASE_PRIORITY: f64 = 1000.0;
/// How much the popularity score can subtract from the base.
pub const POPULARITY_WEIGHT: f64 = 1000.0;

/// Popularity-weighted priority. A fixed priority only ever lowers the
/// result (lower wins), so an admin bump cannot be undone by recomputation.
pub fn compute_priority(popularity: f64, fixed: Option<i64>) -> i64 {
    let p = popularity.clamp(0.0, 1.0);
    let computed = (BASE_PRIORITY - POPULARITY_WEIGHT * p).round() as i64;
    match fixed {
        Some(f) => computed.min(f),
        None => computed,
    }
}

/// Lease/backoff deadline after a terminal attempt.
///
/// Healthy jobs (`error_count == 0`) cool down for days. Flaky jobs retry
/// sooner with a small hourly bump. Chronically broken ones
/// (`error_count > 3`) back off aggressively so they stop dominating the
/// queue. The hourly bump clamps at `MAX_BACKOFF_HOURS`.
pub fn extend_lock_ms(now_ms: i64, error_count: u32) -> i64 {
    let base = if error_count == 0 || error_count > 3 {
        LONG_EXTEND_MS
    } else {
        SHORT_EXTEND_MS
    };
    now_ms + base + i64::from(error_count.min(MAX_BACKOFF_HOURS)) * HOUR_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_scales_with_popularity() {
        assert_eq!(compute_priority(0.0, None), 1000);
        assert_eq!(compute_priority(1.0, None), 0);
        assert_eq!(compute_priority(0.5, None), 500);
        // Out-of-range oracle values are clamped
        assert_eq!(compute_priority(7.5, None), 0);
        assert_eq!(compute_priority(-1.0, None), 1000);
    }

    #[test]
    fn fixed_priority_only_lowers() {
        assert_eq!(compute_priority(0.5, Some(0)), 0);
        assert_eq!(compute_priority(0.9, Some(800)), 100);
    }

    #[test]
    fn extend_lock_success_is_long() {
        assert_eq!(extend_lock_ms(0, 0), LONG_EXTEND_MS);
    }

    #[test]
    fn extend_lock_flaky_is_short_plus_hours() {
        assert_eq!(extend_lock_ms(0, 1), SHORT_EXTEND_MS + HOUR_MS);
        assert_eq!(extend_lock_ms(0, 3), SHORT_EXTEND_MS + 3 * HOUR_MS);
    }

    #[test]
    fn extend_lock_chronic_is_long_plus_hours() {
        assert_eq!(extend_lock_ms(0, 4), LONG_EXTEND_MS + 4 * HOUR_MS);
        assert_eq!(extend_lock_ms(0, 10), LONG_EXTEND_MS + 10 * HOUR_MS);
    }

    #[test]
    fn extend_lock_clamps_hourly_bump() {
        assert_eq!(
            extend_lock_ms(0, 500),
            LONG_EXTEND_MS + 168 * HOUR_MS,
            "bump should clamp at {} hours",
            MAX_BACKOFF_HOURS
        );
    }

    #[test]
    fn job_id_is_uri_structured() {
        let job = Job {
            runtime_version: "2026.07.14".to_string(),
            service: JobService::Analyzer,
            package_name: "http_kit".to_string(),
            package_version: "1.2.0".to_string(),
            is_latest_stable: true,
            package_version_updated_ms: 0,
            state: JobState::Available,
            locked_until_ms: None,
            processing_key: None,
            last_status: LastStatus::None,
            error_count: 0,
            priority: 1000,
        };
        assert_eq!(job.id(), "2026.07.14/analyzer/http_kit/1.2.0");
    }
}
