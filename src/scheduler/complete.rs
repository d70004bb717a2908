//! Completion bookkeeping.

use slatedb::IsolationLevel;

use crate::job::{Job, JobOutcome, JobState, compute_priority, extend_lock_ms};
use crate::retry::retry_tx;
use crate::scheduler::{JobScheduler, SchedulerError, now_epoch_ms, txn_read_job, txn_write_job};

impl JobScheduler {
    /// Record the outcome of a processed job: back to `idle` with a backoff
    /// deadline, `error_count` bumped or reset, priority recomputed.
    ///
    /// The caller passes the job snapshot returned by `lock_available`; its
    /// processing key fences the write. A mismatched key means the lease was
    /// reassigned while we worked - the result is dropped, except for
    /// `Success`, which is always recorded so finished work survives a
    /// stolen lease. Expected races are logged, not surfaced as errors.
    pub async fn complete(&self, job: &Job, outcome: JobOutcome) -> Result<(), SchedulerError> {
        let popularity = self.popularity.popularity(&job.package_name).await;
        retry_tx("complete", || self.complete_inner(job, outcome, popularity)).await
    }

    async fn complete_inner(
        &self,
        job: &Job,
        outcome: JobOutcome,
        popularity: f64,
    ) -> Result<(), SchedulerError> {
        let txn = self.db.begin(IsolationLevel::SerializableSnapshot).await?;
        let Some(stored) = txn_read_job(&txn, &job.key()).await? else {
            tracing::info!(job = %job.id(), "complete: job no longer exists, dropping result");
            return Ok(());
        };

        let fenced_out = stored.processing_key != job.processing_key;
        if fenced_out && outcome != JobOutcome::Success {
            tracing::info!(
                job = %job.id(),
                outcome = ?outcome,
                "complete: lease was reassigned, dropping result"
            );
            return Ok(());
        }

        let error_count = if outcome.is_error() {
            stored.error_count + 1
        } else {
            0
        };
        let now_ms = now_epoch_ms();
        let updated = Job {
            state: JobState::Idle,
            last_status: outcome.as_last_status(),
            processing_key: None,
            locked_until_ms: Some(extend_lock_ms(now_ms, error_count)),
            error_count,
            priority: compute_priority(popularity, None),
            ..stored.clone()
        };
        txn_write_job(&txn, Some(&stored), &updated)?;
        txn.commit().await?;

        tracing::debug!(
            job = %updated.id(),
            outcome = ?outcome,
            error_count,
            "completed job"
        );
        Ok(())
    }
}
