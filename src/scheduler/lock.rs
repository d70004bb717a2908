//! Worker-facing job pickup.

use rand::Rng;
use slatedb::{DbIterator, IsolationLevel};
use uuid::Uuid;

use crate::job::{DEFAULT_LOCK_MS, Job, JobService, JobState};
use crate::keys::{available_index_prefix, end_bound, job_key, parse_index_entry};
use crate::retry::retry_tx;
use crate::scheduler::{JobScheduler, SchedulerError, decode_job, now_epoch_ms, txn_write_job};

/// How many head-of-queue candidates one pickup considers.
const CANDIDATE_LIMIT: usize = 100;
/// First-draw window of the biased pick.
const HEAD_BIAS: usize = 20;

impl JobScheduler {
    /// Lease one available job of the given service, or None when nothing is
    /// eligible right now (the caller polls again later).
    ///
    /// Candidates come from the head of the priority order, but the pick is
    /// randomized across them: draw `r1` uniformly over all candidates and
    /// use it when it lands in the first `HEAD_BIAS` entries, otherwise use a
    /// second uniform draw. High-priority items keep their edge without every
    /// worker stampeding the single top entry. Losing the lock race to
    /// another worker also returns None rather than an error.
    pub async fn lock_available(
        &self,
        service: JobService,
    ) -> Result<Option<Job>, SchedulerError> {
        let prefix = available_index_prefix(self.runtime_version(), service);
        let start = prefix.clone().into_bytes();
        let end = end_bound(&prefix);
        let mut iter: DbIterator = self.db.scan::<Vec<u8>, _>(start..end).await?;

        let mut entries = Vec::new();
        while entries.len() < CANDIDATE_LIMIT {
            let Some(kv) = iter.next().await? else { break };
            if let Some(entry) = parse_index_entry(&kv.key, &prefix) {
                entries.push(entry);
            }
        }

        // Re-read the records and drop index entries that no longer match;
        // the index is only a hint until the locking transaction re-checks.
        let mut candidates = Vec::with_capacity(entries.len());
        for entry in entries {
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
            if job.state == JobState::Available && job.runtime_version == self.runtime_version() {
                candidates.push(job);
            }
        }

        if candidates.is_empty() {
            return Ok(None);
        }

        let pick = {
            let mut rng = rand::rng();
            let r1 = rng.random_range(0..candidates.len());
            if r1 < HEAD_BIAS {
                r1
            } else {
                rng.random_range(0..candidates.len())
            }
        };
        let chosen = &candidates[pick];

        retry_tx("lock_available", || self.lock_one(chosen)).await
    }

    async fn lock_one(&self, chosen: &Job) -> Result<Option<Job>, SchedulerError> {
        let txn = self.db.begin(IsolationLevel::SerializableSnapshot).await?;
        let key = chosen.key();
        let Some(raw) = txn.get(&key).await? else {
            return Ok(None);
        };
        let stored = decode_job(&raw)?;
        if stored.state != JobState::Available
            || stored.runtime_version != self.runtime_version()
        {
            return Ok(None);
        }

        let job = Job {
            state: JobState::Processing,
            processing_key: Some(Uuid::new_v4().to_string()),
            locked_until_ms: Some(now_epoch_ms() + DEFAULT_LOCK_MS),
            ..stored.clone()
        };
        txn_write_job(&txn, Some(&stored), &job)?;
        txn.commit().await?;

        tracing::debug!(job = %job.id(), priority = job.priority, "locked job for processing");
        Ok(Some(job))
    }
}
