//! Periodic maintenance sweeps: stale-lease recovery, idle re-activation,
//! and garbage collection of jobs from retired runtime versions.
//!
//! Every sweep isolates per-job failures: an error on one job is logged and
//! the loop moves on, so a single bad record cannot stall the pass.

use slatedb::{DbIterator, IsolationLevel, WriteBatch};

use crate::catalog::ShouldProcess;
use crate::job::{
    Job, JobService, JobState, LastStatus, SHORT_EXTEND_MS, compute_priority, extend_lock_ms,
};
use crate::keys::{
    IndexEntry, deadline_due_bound, idle_index_prefix, index_key, job_key, jobs_prefix,
    parse_index_entry, parse_job_key, processing_index_prefix,
};
use crate::retry::retry_tx;
use crate::scheduler::{
    JobScheduler, SchedulerError, decode_job, now_epoch_ms, txn_read_job, txn_write_job,
};

/// Jobs deleted per commit during garbage collection.
const GC_BATCH: usize = 20;

impl JobScheduler {
    /// Return expired `processing` leases to `idle` as `aborted` attempts.
    ///
    /// A lease that expired means its worker crashed or stalled; the sweep
    /// bumps `error_count` so the backoff formula spaces out the next try.
    /// The `(state, locked_until)` pair fences each update - a lease that
    /// was re-taken or extended concurrently is skipped. Returns the number
    /// of jobs transitioned.
    pub async fn unlock_stale_processing(
        &self,
        service: JobService,
    ) -> Result<usize, SchedulerError> {
        let prefix = processing_index_prefix(self.runtime_version(), service);
        let due = self.scan_due_entries(&prefix).await?;

        let mut unlocked = 0;
        for entry in due {
            let popularity = self.popularity.popularity(&entry.package_name).await;
            let res = retry_tx("unlock_stale_processing", || {
                self.unlock_one(service, &entry, popularity)
            })
            .await;
            match res {
                Ok(true) => unlocked += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        package = %entry.package_name,
                        version = %entry.package_version,
                        error = %e,
                        "unlock_stale_processing: skipping job"
                    );
                }
            }
        }
        Ok(unlocked)
    }

    async fn unlock_one(
        &self,
        service: JobService,
        entry: &IndexEntry,
        popularity: f64,
    ) -> Result<bool, SchedulerError> {
        let key = job_key(
            self.runtime_version(),
            service,
            &entry.package_name,
            &entry.package_version,
        );
        let txn = self.db.begin(IsolationLevel::SerializableSnapshot).await?;
        let Some(stored) = txn_read_job(&txn, &key).await? else {
            return Ok(false);
        };
        // Fence: same lease as observed in the index, still processing.
        if stored.state != JobState::Processing || stored.locked_until_ms != Some(entry.sort) {
            return Ok(false);
        }

        let error_count = stored.error_count + 1;
        let now_ms = now_epoch_ms();
        let updated = Job {
            state: JobState::Idle,
            last_status: LastStatus::Aborted,
            processing_key: None,
            locked_until_ms: Some(extend_lock_ms(now_ms, error_count)),
            error_count,
            priority: compute_priority(popularity, None),
            ..stored.clone()
        };
        txn_write_job(&txn, Some(&stored), &updated)?;
        txn.commit().await?;

        tracing::info!(job = %updated.id(), error_count, "recovered stale lease");
        Ok(true)
    }

    /// Re-activate idle jobs whose cool-down elapsed, gated by the supplied
    /// predicate. True promotes the job to `available`; false extends the
    /// cool-down without touching the priority. Predicate failures only skip
    /// that job for this pass. Returns the number of jobs promoted.
    pub async fn check_idle(
        &self,
        service: JobService,
        predicate: &dyn ShouldProcess,
    ) -> Result<usize, SchedulerError> {
        let prefix = idle_index_prefix(self.runtime_version(), service);
        let due = self.scan_due_entries(&prefix).await?;

        let mut promoted = 0;
        for entry in due {
            let key = job_key(
                self.runtime_version(),
                service,
                &entry.package_name,
                &entry.package_version,
            );
            let Some(raw) = self.db.get(key.as_bytes()).await? else {
                continue;
            };
            let job = decode_job(&raw)?;
            if job.state != JobState::Idle || job.locked_until_ms != Some(entry.sort) {
                continue;
            }

            let should_process = match predicate
                .should_process(
                    &job.package_name,
                    &job.package_version,
                    job.package_version_updated_ms,
                )
                .await
            {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(job = %job.id(), error = %e, "check_idle: predicate failed");
                    continue;
                }
            };

            let popularity = if should_process {
                Some(self.popularity.popularity(&job.package_name).await)
            } else {
                None
            };
            let res = retry_tx("check_idle", || {
                self.check_one(service, &entry, should_process, popularity)
            })
            .await;
            match res {
                Ok(true) => promoted += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(job = %job.id(), error = %e, "check_idle: skipping job");
                }
            }
        }
        Ok(promoted)
    }

    async fn check_one(
        &self,
        service: JobService,
        entry: &IndexEntry,
        should_process: bool,
        popularity: Option<f64>,
    ) -> Result<bool, SchedulerError> {
        let key = job_key(
            self.runtime_version(),
            service,
            &entry.package_name,
            &entry.package_version,
        );
        let txn = self.db.begin(IsolationLevel::SerializableSnapshot).await?;
        let Some(stored) = txn_read_job(&txn, &key).await? else {
            return Ok(false);
        };
        if stored.state != JobState::Idle || stored.locked_until_ms != Some(entry.sort) {
            return Ok(false);
        }

        let updated = if should_process {
            Job {
                state: JobState::Available,
                processing_key: None,
                locked_until_ms: None,
                priority: compute_priority(popularity.unwrap_or(0.0), None),
                ..stored.clone()
            }
        } else {
            // Extension only: priority stays as stored.
            Job {
                locked_until_ms: Some(now_epoch_ms() + SHORT_EXTEND_MS),
                ..stored.clone()
            }
        };
        txn_write_job(&txn, Some(&stored), &updated)?;
        txn.commit().await?;
        Ok(should_process)
    }

    /// Delete every job tagged with a runtime version below the configured
    /// GC bound, in batches of `GC_BATCH` jobs per commit. Returns the number
    /// of jobs deleted.
    ///
    /// Old-version jobs are dead weight by construction - no live worker
    /// queries them - so plain batched writes suffice here, no transactions.
    pub async fn delete_old_entries(&self) -> Result<usize, SchedulerError> {
        let start = jobs_prefix().into_bytes();
        let end = format!("jobs/{}", self.gc_before_runtime_version()).into_bytes();
        if end <= start {
            return Ok(0);
        }
        let mut iter: DbIterator = self.db.scan::<Vec<u8>, _>(start..end).await?;

        let mut deleted = 0;
        let mut in_batch = 0;
        let mut batch = WriteBatch::new();
        while let Some(kv) = iter.next().await? {
            if parse_job_key(&kv.key).is_none() {
                continue;
            }
            let job = decode_job(&kv.value)?;
            batch.delete(&kv.key);
            batch.delete(index_key(&job).as_bytes());
            deleted += 1;
            in_batch += 1;
            if in_batch == GC_BATCH {
                self.db.write(std::mem::replace(&mut batch, WriteBatch::new()))
                    .await?;
                in_batch = 0;
            }
        }
        if in_batch > 0 {
            self.db.write(batch).await?;
        }
        if deleted > 0 {
            self.db.flush().await?;
            tracing::info!(
                deleted,
                gc_before = %self.gc_before_runtime_version(),
                "garbage-collected jobs from old runtime versions"
            );
        }
        Ok(deleted)
    }

    /// Collect index entries under `prefix` whose deadline already passed.
    async fn scan_due_entries(&self, prefix: &str) -> Result<Vec<IndexEntry>, SchedulerError> {
        let now_ms = now_epoch_ms();
        let start = prefix.as_bytes().to_vec();
        let end = deadline_due_bound(prefix, now_ms).into_bytes();
        let mut iter: DbIterator = self.db.scan::<Vec<u8>, _>(start..end).await?;

        let mut due = Vec::new();
        while let Some(kv) = iter.next().await? {
            if let Some(entry) = parse_index_entry(&kv.key, prefix) {
                due.push(entry);
            }
        }
        Ok(due)
    }
}
