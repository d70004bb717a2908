use std::fs;
use std::path::Path;
use std::sync::Arc;

use slatedb::object_store::ObjectStore;
use slatedb::Db;
use thiserror::Error;
use url::Url;

use crate::settings::Backend;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("slatedb error: {0}")]
    Slate(#[from] slatedb::Error),
    #[error("invalid object store url: {0}")]
    InvalidUrl(String),
}

/// Result of resolving an object store, includes the canonical path to hand
/// to `DbBuilder` (empty for LocalFileSystem since the root is already set).
pub struct ResolvedStore {
    pub store: Arc<dyn ObjectStore>,
    pub canonical_path: String,
}

pub fn resolve_object_store(backend: &Backend, path: &str) -> Result<ResolvedStore, StorageError> {
    match backend {
        Backend::Fs => {
            let root = Path::new(path);
            if !root.exists() {
                fs::create_dir_all(root).map_err(|e| {
                    StorageError::InvalidUrl(format!("failed to create fs root {}: {}", path, e))
                })?;
            }
            // Canonicalize to avoid URL-encoding issues with relative paths.
            let canonical = root.canonicalize().map_err(|e| {
                StorageError::InvalidUrl(format!("failed to canonicalize path {}: {}", path, e))
            })?;
            // Use slatedb's re-exported object_store to ensure trait compatibility
            let fs = slatedb::object_store::local::LocalFileSystem::new_with_prefix(&canonical)
                .map_err(|e| StorageError::InvalidUrl(format!("{}", e)))?;
            Ok(ResolvedStore {
                store: Arc::new(fs),
                canonical_path: String::new(),
            })
        }
        Backend::Memory => Ok(ResolvedStore {
            store: Arc::new(slatedb::object_store::memory::InMemory::new()),
            canonical_path: path.to_string(),
        }),
        Backend::Url => {
            // Interpret path as a URL understood by SlateDB's resolver,
            // e.g. s3://bucket/prefix or gs://bucket/prefix
            let store = Db::resolve_object_store(path)?;

            // DbBuilder wants the path relative to the object store's root
            // (the bucket), not the full URL.
            let canonical_path = match Url::parse(path) {
                Ok(url) => {
                    let url_path = url.path();
                    url_path.strip_prefix('/').unwrap_or(url_path).to_string()
                }
                Err(e) => {
                    return Err(StorageError::InvalidUrl(format!(
                        "failed to parse object store URL '{}': {}. Expected format: s3://bucket/path",
                        path, e
                    )));
                }
            };

            Ok(ResolvedStore {
                store,
                canonical_path,
            })
        }
    }
}
