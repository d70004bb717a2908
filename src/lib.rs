//! grist - a persistent job scheduler for package catalog background work.
//!
//! Jobs live in a transactional key-value store shared by many stateless
//! worker processes. Each job tracks one `(service, package, version)` work
//! item through the `available -> processing -> idle` lifecycle, with
//! lease-based locking, stale-lease recovery, failure backoff, and a
//! popularity-weighted priority ordering. All mutations go through optimistic
//! transactions, so there is no central coordinator.

pub mod catalog;
pub mod job;
pub mod keys;
pub mod retry;
pub mod scheduler;
pub mod settings;
pub mod storage;
pub mod trace;
pub mod worker;

/// Async test attribute with per-test tracing, see `grist_macros::test`.
pub use grist_macros::test;
