
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use grist::job::{Job, JobOutcome, JobService, JobState, LastStatus};
use grist::settings::WorkerConfig;
use grist::worker::{JobProcessor, run_maintenance, run_worker};

use test_helpers::*;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

struct RecordingProcessor {
    outcome: JobOutcome,
    processed: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl JobProcessor for RecordingProcessor {
    async fn process(&self, job: &Job) -> JobOutcome {
        let _ = self.processed.send(job.package_name.clone());
        self.outcome
    }
}

fn fast_worker_config() -> WorkerConfig {
    WorkerConfig {
        poll_interval_ms: 20,
        maintenance_interval_ms: 50,
    }
}

#[grist::test]
async fn worker_loop_processes_and_completes_jobs() {
    with_timeout!(30000, {
        let env = open_temp_scheduler().await;
        env.scheduler
            .create_or_update(
                JobService::Analyzer,
                "http_kit",
                "1.0.0",
                true,
                now_ms() - DAY_MS,
                true,
                None,
            )
            .await
            .expect("seed");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let processor = Arc::new(RecordingProcessor {
            outcome: JobOutcome::Success,
            processed: tx,
        });
        let handle = tokio::spawn(run_worker(
            env.scheduler.clone(),
            JobService::Analyzer,
            processor,
            fast_worker_config(),
            shutdown_rx,
        ));

        let processed = rx.recv().await.expect("worker processed a job");
        assert_eq!(processed, "http_kit");

        // Wait for the completion write to land, then stop the loop.
        loop {
            let job = env
                .scheduler
                .get_job(JobService::Analyzer, "http_kit", "1.0.0")
                .await
                .expect("get")
                .expect("exists");
            if job.state == JobState::Idle {
                assert_eq!(job.last_status, LastStatus::Success);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        shutdown_tx.send(()).expect("signal shutdown");
        handle.await.expect("worker loop exits cleanly");
    });
}

#[grist::test]
async fn maintenance_loop_recovers_expired_leases() {
    with_timeout!(30000, {
        let env = open_temp_scheduler().await;
        env.scheduler
            .create_or_update(
                JobService::Analyzer,
                "http_kit",
                "1.0.0",
                true,
                now_ms() - DAY_MS,
                true,
                None,
            )
            .await
            .expect("seed");
        let job = env
            .scheduler
            .lock_available(JobService::Analyzer)
            .await
            .expect("lock")
            .expect("available");
        force_deadline(&env.scheduler, &job, now_ms() - 1000).await;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let predicate = Arc::new(FakePredicate::new(false));
        let handle = tokio::spawn(run_maintenance(
            env.scheduler.clone(),
            JobService::Analyzer,
            predicate,
            fast_worker_config(),
            shutdown_rx,
        ));

        loop {
            let stored = env
                .scheduler
                .get_job(JobService::Analyzer, "http_kit", "1.0.0")
                .await
                .expect("get")
                .expect("exists");
            if stored.state == JobState::Idle {
                assert_eq!(stored.last_status, LastStatus::Aborted);
                assert_eq!(stored.error_count, 1);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        shutdown_tx.send(()).expect("signal shutdown");
        handle.await.expect("maintenance loop exits cleanly");
    });
}
