//! Collaborator seams around the scheduler core.
//!
//! The package metadata store, the popularity oracle, and the idle-job
//! freshness predicate are all external services. The scheduler only sees
//! these traits; implementations live with the deployment.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog backend error: {0}")]
    Backend(String),
}

/// Summary of a package record.
#[derive(Debug, Clone)]
pub struct PackageInfo {
    pub latest_version: String,
    /// Moderated or withdrawn packages are invisible and never scheduled.
    pub is_visible: bool,
}

/// Summary of one version record of a package.
#[derive(Debug, Clone)]
pub struct VersionInfo {
    /// When this version was published (epoch ms).
    pub created_ms: i64,
}

/// Read access to the package metadata store.
#[async_trait]
pub trait PackageCatalog: Send + Sync {
    async fn package(&self, name: &str) -> Result<Option<PackageInfo>, CatalogError>;

    async fn package_version(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Option<VersionInfo>, CatalogError>;
}

/// Maps a package name to a popularity score in `[0, 1]`.
///
/// Infallible by contract: unknown packages score 0. Callers must tolerate
/// lookup latency since priorities are recomputed inline on every job write.
#[async_trait]
pub trait PopularityOracle: Send + Sync {
    async fn popularity(&self, package: &str) -> f64;
}

/// Oracle that scores every package 0, for deployments without popularity
/// data. All jobs then share the neutral base priority.
pub struct NullPopularity;

#[async_trait]
impl PopularityOracle for NullPopularity {
    async fn popularity(&self, _package: &str) -> f64 {
        0.0
    }
}

/// Decides whether an idle job's upstream data warrants reprocessing.
/// Invoked by the idle sweep once a job's cool-down deadline passes; may
/// perform I/O. A failure only skips that job for this pass.
#[async_trait]
pub trait ShouldProcess: Send + Sync {
    async fn should_process(
        &self,
        package: &str,
        version: &str,
        updated_ms: i64,
    ) -> Result<bool, CatalogError>;
}
