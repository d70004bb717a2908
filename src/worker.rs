//! Worker and maintenance loops.
//!
//! A deployment runs any number of worker tasks per service plus one
//! maintenance task per service and process. All coordination happens
//! through the job table; the loops themselves keep no state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::catalog::ShouldProcess;
use crate::job::{Job, JobOutcome, JobService};
use crate::scheduler::JobScheduler;
use crate::settings::WorkerConfig;

/// The actual unit of work: analyze a package version, build its docs.
/// Implementations report an outcome instead of failing; a panic or crash
/// simply lets the lease expire and the stale sweep records `aborted`.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: &Job) -> JobOutcome;
}

/// Pull-process-complete loop for one service.
///
/// Runs until the shutdown signal fires. Lock and completion races are
/// normal operation; real errors are logged and the loop backs off for one
/// poll interval rather than dying.
pub async fn run_worker(
    scheduler: Arc<JobScheduler>,
    service: JobService,
    processor: Arc<dyn JobProcessor>,
    cfg: WorkerConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    let poll = Duration::from_millis(cfg.poll_interval_ms);
    tracing::info!(service = %service, "worker loop starting");
    loop {
        let idle = match scheduler.lock_available(service).await {
            Ok(Some(job)) => {
                let outcome = processor.process(&job).await;
                if let Err(e) = scheduler.complete(&job, outcome).await {
                    tracing::warn!(job = %job.id(), error = %e, "failed to record completion");
                }
                false
            }
            Ok(None) => true,
            Err(e) => {
                tracing::warn!(service = %service, error = %e, "lock_available failed");
                true
            }
        };

        if idle {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(poll) => {}
            }
        } else if shutdown.try_recv().is_ok() {
            break;
        }
    }
    tracing::info!(service = %service, "worker loop stopped");
}

/// Periodic maintenance for one service: stale-lease recovery, idle
/// re-activation, runtime-version GC, and a stats pass for operators.
/// Failures of one sweep never stop the others or the loop.
pub async fn run_maintenance(
    scheduler: Arc<JobScheduler>,
    service: JobService,
    predicate: Arc<dyn ShouldProcess>,
    cfg: WorkerConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    let interval = Duration::from_millis(cfg.maintenance_interval_ms);
    tracing::info!(service = %service, "maintenance loop starting");
    loop {
        match scheduler.unlock_stale_processing(service).await {
            Ok(n) if n > 0 => tracing::info!(service = %service, unlocked = n, "stale sweep"),
            Ok(_) => {}
            Err(e) => tracing::warn!(service = %service, error = %e, "stale sweep failed"),
        }

        match scheduler.check_idle(service, predicate.as_ref()).await {
            Ok(n) if n > 0 => tracing::info!(service = %service, promoted = n, "idle check"),
            Ok(_) => {}
            Err(e) => tracing::warn!(service = %service, error = %e, "idle check failed"),
        }

        if let Err(e) = scheduler.delete_old_entries().await {
            tracing::warn!(service = %service, error = %e, "garbage collection failed");
        }

        match scheduler.stats(service).await {
            Ok(stats) => tracing::info!(
                service = %service,
                available = stats.all.available,
                processing = stats.all.processing,
                idle = stats.all.idle,
                failed_recent = stats.failed_packages.len(),
                eta = %stats.eta,
                "stats"
            ),
            Err(e) => tracing::warn!(service = %service, error = %e, "stats pass failed"),
        }

        tokio::select! {
            _ = shutdown.recv() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    tracing::info!(service = %service, "maintenance loop stopped");
}
