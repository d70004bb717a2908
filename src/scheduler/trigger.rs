//! Upstream-change entry point.

use crate::job::JobService;
use crate::scheduler::{JobScheduler, SchedulerError};

impl JobScheduler {
    /// React to an upstream change (package publish, admin request) by
    /// creating or refreshing the matching job.
    ///
    /// Missing or invisible packages and unknown versions make this a logged
    /// no-op, so callers can fire triggers for anything they see without
    /// pre-validating. `updated_ms` is the caller's high-water mark of the
    /// source data; when it does not exceed the version's publish time the
    /// job only cools down in `idle` instead of queueing for work.
    /// `high_priority` queues unconditionally at the front.
    pub async fn trigger(
        &self,
        service: JobService,
        package: &str,
        version: Option<&str>,
        updated_ms: Option<i64>,
        high_priority: bool,
    ) -> Result<(), SchedulerError> {
        let Some(pkg) = self.catalog.package(package).await? else {
            tracing::info!(package, "trigger: package does not exist, ignoring");
            return Ok(());
        };
        if !pkg.is_visible {
            tracing::info!(package, "trigger: package is not visible, ignoring");
            return Ok(());
        }

        let version = version.unwrap_or(&pkg.latest_version);
        let Some(version_info) = self.catalog.package_version(package, version).await? else {
            tracing::info!(package, version, "trigger: package version does not exist, ignoring");
            return Ok(());
        };

        let is_latest_stable = pkg.latest_version == version;
        let should_process =
            high_priority || updated_ms.is_none_or(|u| u > version_info.created_ms);

        self.create_or_update(
            service,
            package,
            version,
            is_latest_stable,
            version_info.created_ms,
            should_process,
            high_priority.then_some(0),
        )
        .await
    }
}
