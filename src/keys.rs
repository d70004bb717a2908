//! Key layout for the job table and its state indexes.
//!
//! The primary record lives at `jobs/<runtime_version>/<service>/<pkg>/<ver>`
//! so that one range scan covers a runtime version (garbage collection) or a
//! `(runtime version, service)` pair (stats). Each job additionally owns
//! exactly one state-index entry, rewritten in the same transaction as the
//! job itself:
//!
//! - `idx/available/<rv>/<service>/<priority:010>/<pkg>/<ver>`
//! - `idx/processing/<rv>/<service>/<locked_until:020>/<pkg>/<ver>`
//! - `idx/idle/<rv>/<service>/<locked_until:020>/<pkg>/<ver>`
//!
//! Zero-padding makes lexicographic scan order equal numeric order, so the
//! available index reads back in priority order and the deadline indexes
//! expose "due" entries as a prefix range.

use crate::job::{Job, JobService, JobState};

pub fn jobs_prefix() -> String {
    "jobs/".to_string()
}

/// Primary key for a job record.
pub fn job_key(runtime_version: &str, service: JobService, package: &str, version: &str) -> String {
    format!("jobs/{}/{}/{}/{}", runtime_version, service, package, version)
}

/// Prefix covering every job of one service at one runtime version.
pub fn service_prefix(runtime_version: &str, service: JobService) -> String {
    format!("jobs/{}/{}/", runtime_version, service)
}

pub fn available_index_prefix(runtime_version: &str, service: JobService) -> String {
    format!("idx/available/{}/{}/", runtime_version, service)
}

pub fn available_index_key(
    runtime_version: &str,
    service: JobService,
    priority: i64,
    package: &str,
    version: &str,
) -> String {
    format!(
        "{}{:010}/{}/{}",
        available_index_prefix(runtime_version, service),
        priority.max(0) as u64,
        package,
        version
    )
}

pub fn processing_index_prefix(runtime_version: &str, service: JobService) -> String {
    format!("idx/processing/{}/{}/", runtime_version, service)
}

pub fn idle_index_prefix(runtime_version: &str, service: JobService) -> String {
    format!("idx/idle/{}/{}/", runtime_version, service)
}

fn deadline_index_key(prefix: String, locked_until_ms: i64, package: &str, version: &str) -> String {
    format!(
        "{}{:020}/{}/{}",
        prefix,
        locked_until_ms.max(0) as u64,
        package,
        version
    )
}

/// The single state-index entry a job owns in its current state.
pub fn index_key(job: &Job) -> String {
    match job.state {
        JobState::Available => available_index_key(
            &job.runtime_version,
            job.service,
            job.priority,
            &job.package_name,
            &job.package_version,
        ),
        JobState::Processing => deadline_index_key(
            processing_index_prefix(&job.runtime_version, job.service),
            job.locked_until_ms.unwrap_or(0),
            &job.package_name,
            &job.package_version,
        ),
        JobState::Idle => deadline_index_key(
            idle_index_prefix(&job.runtime_version, job.service),
            job.locked_until_ms.unwrap_or(0),
            &job.package_name,
            &job.package_version,
        ),
    }
}

/// Exclusive end bound selecting index entries whose deadline is `< now`.
pub fn deadline_due_bound(prefix: &str, now_ms: i64) -> String {
    format!("{}{:020}", prefix, now_ms.max(0) as u64)
}

/// End bound for a full prefix scan.
pub fn end_bound(prefix: &str) -> Vec<u8> {
    let mut end = prefix.as_bytes().to_vec();
    end.push(0xFF);
    end
}

/// A parsed state-index entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Priority (available index) or lease deadline (processing/idle index).
    pub sort: i64,
    pub package_name: String,
    pub package_version: String,
}

/// Parse `<sort>/<pkg>/<ver>` after the given index prefix. Returns None for
/// keys outside the prefix or with an unexpected shape.
pub fn parse_index_entry(key: &[u8], prefix: &str) -> Option<IndexEntry> {
    let key = std::str::from_utf8(key).ok()?;
    let rest = key.strip_prefix(prefix)?;
    let mut parts = rest.splitn(3, '/');
    let sort = parts.next()?.parse::<u64>().ok()? as i64;
    let package_name = parts.next()?.to_string();
    let package_version = parts.next()?.to_string();
    if package_name.is_empty() || package_version.is_empty() {
        return None;
    }
    Some(IndexEntry {
        sort,
        package_name,
        package_version,
    })
}

/// A parsed primary job key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedJobKey {
    pub runtime_version: String,
    pub service: JobService,
    pub package_name: String,
    pub package_version: String,
}

pub fn parse_job_key(key: &[u8]) -> Option<ParsedJobKey> {
    let key = std::str::from_utf8(key).ok()?;
    let rest = key.strip_prefix("jobs/")?;
    let mut parts = rest.splitn(4, '/');
    let runtime_version = parts.next()?.to_string();
    let service = JobService::parse(parts.next()?)?;
    let package_name = parts.next()?.to_string();
    let package_version = parts.next()?.to_string();
    if runtime_version.is_empty() || package_name.is_empty() || package_version.is_empty() {
        return None;
    }
    Some(ParsedJobKey {
        runtime_version,
        service,
        package_name,
        package_version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_key_round_trips() {
        let key = job_key("2026.07.14", JobService::Docgen, "http_kit", "1.2.0");
        assert_eq!(key, "jobs/2026.07.14/docgen/http_kit/1.2.0");
        let parsed = parse_job_key(key.as_bytes()).expect("parse");
        assert_eq!(parsed.runtime_version, "2026.07.14");
        assert_eq!(parsed.service, JobService::Docgen);
        assert_eq!(parsed.package_name, "http_kit");
        assert_eq!(parsed.package_version, "1.2.0");
    }

    #[test]
    fn available_index_orders_by_priority() {
        let lo = available_index_key("v", JobService::Analyzer, 3, "a", "1.0.0");
        let hi = available_index_key("v", JobService::Analyzer, 200, "a", "1.0.0");
        assert!(lo < hi, "lower priority value must sort first");
    }

    #[test]
    fn deadline_due_bound_excludes_future_entries() {
        let prefix = idle_index_prefix("v", JobService::Analyzer);
        let due = deadline_index_key(prefix.clone(), 999, "a", "1.0.0");
        let not_due = deadline_index_key(prefix.clone(), 1001, "a", "1.0.0");
        let exactly_now = deadline_index_key(prefix.clone(), 1000, "a", "1.0.0");
        let bound = deadline_due_bound(&prefix, 1000);
        assert!(due < bound);
        assert!(not_due >= bound);
        assert!(exactly_now >= bound, "deadline == now is not yet due");
    }

    #[test]
    fn index_entry_parses_sort_and_identity() {
        let prefix = available_index_prefix("v", JobService::Analyzer);
        let key = available_index_key("v", JobService::Analyzer, 42, "pkg", "2.0.0-beta.1");
        let parsed = parse_index_entry(key.as_bytes(), &prefix).expect("parse");
        assert_eq!(parsed.sort, 42);
        assert_eq!(parsed.package_name, "pkg");
        assert_eq!(parsed.package_version, "2.0.0-beta.1");
    }

    #[test]
    fn gc_bound_splits_runtime_versions() {
        let old = job_key("2025.12.01", JobService::Analyzer, "a", "1.0.0");
        let current = job_key("2026.07.14", JobService::Analyzer, "a", "1.0.0");
        let bound = format!("jobs/{}", "2026.01.01");
        assert!(old < bound);
        assert!(current >= bound);
    }
}
