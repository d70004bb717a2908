//! `create_or_update` - the single write path for job records.

use slatedb::IsolationLevel;

use crate::job::{compute_priority, Job, JobService, JobState, LastStatus, SHORT_EXTEND_MS};
use crate::keys::job_key;
use crate::retry::retry_tx;
use crate::scheduler::{now_epoch_ms, txn_read_job, txn_write_job, JobScheduler, SchedulerError};

impl JobScheduler {
    /// Create a job for `(service, package, version)` or refresh the existing
    /// one. Idempotent and monotone in data freshness: repeating a call with
    /// unchanged inputs mutates nothing, and a re-trigger can only regress
    /// state when the stored data is genuinely obsolete - in which case any
    /// in-flight lease is deliberately abandoned by clearing the processing
    /// key, so the orphaned worker's `complete` gets fenced out.
    ///
    /// `should_process` selects the insert/overwrite target: `available`
    /// (work is stale) or `idle` with a short cool-down (freshly current).
    /// `fixed_priority` only ever lowers the stored priority (lower wins).
    #[allow(clippy::too_many_arguments)]
    pub async fn create_or_update(
        &self,
        service: JobService,
        package: &str,
        version: &str,
        is_latest_stable: bool,
        package_version_updated_ms: i64,
        should_process: bool,
        fixed_priority: Option<i64>,
    ) -> Result<(), SchedulerError> {
        // Priority inputs don't change across conflict retries, so the
        // oracle is consulted once up front.
        let popularity = self.popularity.popularity(package).await;
        let priority = compute_priority(popularity, fixed_priority);

        retry_tx("create_or_update", || {
            self.create_or_update_inner(
                service,
                package,
                version,
                is_latest_stable,
                package_version_updated_ms,
                should_process,
                fixed_priority,
                priority,
            )
        })
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_or_update_inner(
        &self,
        service: JobService,
        package: &str,
        version: &str,
        is_latest_stable: bool,
        package_version_updated_ms: i64,
        should_process: bool,
        fixed_priority: Option<i64>,
        priority: i64,
    ) -> Result<(), SchedulerError> {
        let now_ms = now_epoch_ms();
        let key = job_key(self.runtime_version(), service, package, version);

        let txn = self.db.begin(IsolationLevel::SerializableSnapshot).await?;
        let stored = txn_read_job(&txn, &key).await?;

        let (state, locked_until_ms) = if should_process {
            (JobState::Available, None)
        } else {
            (JobState::Idle, Some(now_ms + SHORT_EXTEND_MS))
        };

        let Some(stored) = stored else {
            let job = Job {
                runtime_version: self.runtime_version().to_string(),
                service,
                package_name: package.to_string(),
                package_version: version.to_string(),
                is_latest_stable,
                package_version_updated_ms,
                state,
                locked_until_ms,
                processing_key: None,
                last_status: LastStatus::None,
                error_count: 0,
                priority,
            };
            txn_write_job(&txn, None, &job)?;
            txn.commit().await?;
            tracing::debug!(job = %job.id(), state = %job.state.as_str(), "created job");
            return Ok(());
        };

        // Equal timestamps count as "not changed"; only strictly newer
        // source data forces a refresh.
        let has_not_changed = stored.is_latest_stable == is_latest_stable
            && stored.package_version_updated_ms >= package_version_updated_ms
            && fixed_priority.is_none_or(|fixed| stored.priority <= fixed);

        if has_not_changed {
            if !should_process {
                return Ok(());
            }
            // Already queued for pickup: nothing to refresh.
            if stored.state == JobState::Available && stored.locked_until_ms.is_none() {
                return Ok(());
            }
        }

        let job = Job {
            is_latest_stable,
            package_version_updated_ms: stored
                .package_version_updated_ms
                .max(package_version_updated_ms),
            state,
            locked_until_ms,
            processing_key: None,
            priority,
            ..stored.clone()
        };
        txn_write_job(&txn, Some(&stored), &job)?;
        txn.commit().await?;
        tracing::debug!(job = %job.id(), state = %job.state.as_str(), "refreshed job");
        Ok(())
    }
}
