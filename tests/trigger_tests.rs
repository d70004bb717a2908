
use grist::job::{JobService, JobState, LastStatus};

use test_helpers::*;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

#[grist::test]
async fn trigger_with_stale_data_creates_available_job() {
    with_timeout!(20000, {
        let env = open_temp_scheduler().await;
        let created = now_ms() - 2 * DAY_MS;
        env.catalog.add_package("http_kit", "1.0.0");
        env.catalog.add_version("http_kit", "1.0.0", created);

        env.scheduler
            .trigger(
                JobService::Analyzer,
                "http_kit",
                Some("1.0.0"),
                Some(created + DAY_MS),
                false,
            )
            .await
            .expect("trigger");

        let job = env
            .scheduler
            .get_job(JobService::Analyzer, "http_kit", "1.0.0")
            .await
            .expect("get")
            .expect("job exists");
        assert_eq!(job.state, JobState::Available);
        assert_eq!(job.locked_until_ms, None);
        assert_eq!(job.processing_key, None);
        assert_eq!(job.last_status, LastStatus::None);
        assert_eq!(job.error_count, 0);
        assert!(job.is_latest_stable);
        assert_eq!(job.package_version_updated_ms, created);
    });
}

#[grist::test]
async fn trigger_with_current_data_creates_idle_job() {
    with_timeout!(20000, {
        let env = open_temp_scheduler().await;
        let created = now_ms();
        env.catalog.add_package("http_kit", "1.0.0");
        env.catalog.add_version("http_kit", "1.0.0", created);

        // Caller's high-water mark predates the publish: nothing to redo.
        env.scheduler
            .trigger(
                JobService::Analyzer,
                "http_kit",
                Some("1.0.0"),
                Some(created - DAY_MS),
                false,
            )
            .await
            .expect("trigger");

        let job = env
            .scheduler
            .get_job(JobService::Analyzer, "http_kit", "1.0.0")
            .await
            .expect("get")
            .expect("job exists");
        assert_eq!(job.state, JobState::Idle);
        let locked = job.locked_until_ms.expect("idle jobs carry a deadline");
        assert!(locked > now_ms(), "cool-down deadline should be in the future");
    });
}

#[grist::test]
async fn trigger_without_updated_mark_queues_for_work() {
    with_timeout!(20000, {
        let env = open_temp_scheduler().await;
        env.catalog.add_package("http_kit", "2.1.0");
        env.catalog.add_version("http_kit", "2.1.0", now_ms());

        env.scheduler
            .trigger(JobService::Docgen, "http_kit", None, None, false)
            .await
            .expect("trigger");

        // Version defaulted to the package's latest; no updated mark means
        // process unconditionally.
        let job = env
            .scheduler
            .get_job(JobService::Docgen, "http_kit", "2.1.0")
            .await
            .expect("get")
            .expect("job exists");
        assert_eq!(job.state, JobState::Available);
    });
}

#[grist::test]
async fn trigger_is_noop_for_unknown_or_hidden_packages() {
    with_timeout!(20000, {
        let env = open_temp_scheduler().await;

        env.scheduler
            .trigger(JobService::Analyzer, "ghost", None, None, false)
            .await
            .expect("unknown package is not an error");

        env.catalog.add_package("shy", "1.0.0");
        env.catalog.add_version("shy", "1.0.0", now_ms());
        env.catalog.hide_package("shy");
        env.scheduler
            .trigger(JobService::Analyzer, "shy", Some("1.0.0"), None, false)
            .await
            .expect("hidden package is not an error");

        env.catalog.add_package("partial", "3.0.0");
        env.scheduler
            .trigger(JobService::Analyzer, "partial", Some("3.0.0"), None, false)
            .await
            .expect("unknown version is not an error");

        assert!(env
            .scheduler
            .get_job(JobService::Analyzer, "ghost", "1.0.0")
            .await
            .expect("get")
            .is_none());
        assert!(env
            .scheduler
            .get_job(JobService::Analyzer, "shy", "1.0.0")
            .await
            .expect("get")
            .is_none());
        assert!(env
            .scheduler
            .get_job(JobService::Analyzer, "partial", "3.0.0")
            .await
            .expect("get")
            .is_none());
    });
}

#[grist::test]
async fn repeated_trigger_mutates_nothing() {
    with_timeout!(20000, {
        let env = open_temp_scheduler().await;
        let created = now_ms() - DAY_MS;
        env.catalog.add_package("http_kit", "1.0.0");
        env.catalog.add_version("http_kit", "1.0.0", created);

        let updated = Some(created + 1000);
        env.scheduler
            .trigger(JobService::Analyzer, "http_kit", Some("1.0.0"), updated, false)
            .await
            .expect("first trigger");
        let first = env
            .scheduler
            .get_job(JobService::Analyzer, "http_kit", "1.0.0")
            .await
            .expect("get")
            .expect("job exists");

        env.scheduler
            .trigger(JobService::Analyzer, "http_kit", Some("1.0.0"), updated, false)
            .await
            .expect("second trigger");
        let second = env
            .scheduler
            .get_job(JobService::Analyzer, "http_kit", "1.0.0")
            .await
            .expect("get")
            .expect("job exists");

        assert_eq!(first, second, "identical trigger must not mutate the job");
    });
}

#[grist::test]
async fn high_priority_trigger_pins_priority_to_zero() {
    with_timeout!(20000, {
        let env = open_temp_scheduler().await;
        let created = now_ms();
        env.catalog.add_package("niche_pkg", "1.0.0");
        env.catalog.add_version("niche_pkg", "1.0.0", created);
        env.popularity.set("niche_pkg", 0.1);

        env.scheduler
            .trigger(
                JobService::Analyzer,
                "niche_pkg",
                Some("1.0.0"),
                Some(created - DAY_MS),
                true,
            )
            .await
            .expect("trigger");

        let job = env
            .scheduler
            .get_job(JobService::Analyzer, "niche_pkg", "1.0.0")
            .await
            .expect("get")
            .expect("job exists");
        assert_eq!(job.state, JobState::Available, "high priority always queues");
        assert_eq!(job.priority, 0);
    });
}

#[grist::test]
async fn priority_follows_popularity() {
    with_timeout!(20000, {
        let env = open_temp_scheduler().await;
        let created = now_ms() - DAY_MS;
        for (pkg, score) in [("hot_pkg", 0.9), ("cold_pkg", 0.0)] {
            env.catalog.add_package(pkg, "1.0.0");
            env.catalog.add_version(pkg, "1.0.0", created);
            env.popularity.set(pkg, score);
            env.scheduler
                .trigger(JobService::Analyzer, pkg, Some("1.0.0"), None, false)
                .await
                .expect("trigger");
        }

        let hot = env
            .scheduler
            .get_job(JobService::Analyzer, "hot_pkg", "1.0.0")
            .await
            .expect("get")
            .expect("exists");
        let cold = env
            .scheduler
            .get_job(JobService::Analyzer, "cold_pkg", "1.0.0")
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(hot.priority, 100);
        assert_eq!(cold.priority, 1000);
        assert!(hot.priority < cold.priority, "popular packages go first");
    });
}

#[grist::test]
async fn create_or_update_twice_equals_once() {
    with_timeout!(20000, {
        let env = open_temp_scheduler().await;
        let updated = now_ms() - DAY_MS;

        for _ in 0..2 {
            env.scheduler
                .create_or_update(
                    JobService::Docgen,
                    "http_kit",
                    "1.0.0",
                    true,
                    updated,
                    true,
                    None,
                )
                .await
                .expect("create_or_update");
        }

        let job = env
            .scheduler
            .get_job(JobService::Docgen, "http_kit", "1.0.0")
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(job.state, JobState::Available);
        assert_eq!(job.package_version_updated_ms, updated);
    });
}

#[grist::test]
async fn stored_freshness_never_decreases() {
    with_timeout!(20000, {
        let env = open_temp_scheduler().await;
        let newer = now_ms();
        let older = newer - DAY_MS;

        env.scheduler
            .create_or_update(JobService::Analyzer, "pkg", "1.0.0", true, newer, true, None)
            .await
            .expect("first write");
        // A refresh that changes latest-stable but carries older source data
        // must not roll the high-water mark back.
        env.scheduler
            .create_or_update(JobService::Analyzer, "pkg", "1.0.0", false, older, false, None)
            .await
            .expect("second write");

        let job = env
            .scheduler
            .get_job(JobService::Analyzer, "pkg", "1.0.0")
            .await
            .expect("get")
            .expect("exists");
        assert!(!job.is_latest_stable, "flag change must apply");
        assert_eq!(
            job.package_version_updated_ms, newer,
            "freshness mark is monotone"
        );
    });
}
