//! Built-in job types.
//!
//! | Type            | Work                                               |
//! |-----------------|----------------------------------------------------|
//! | `library_scan`  | Walk a media library and count media files         |
//! | `cache_cleanup` | Delete cache files older than a cutoff             |
//!
//! Both walk the filesystem on a blocking thread and poll the cancellation
//! token between files.

mod cache_cleanup;
mod library_scan;

pub use cache_cleanup::{CacheCleanup, CacheCleanupConfig};
pub use library_scan::{LibraryScan, LibraryScanConfig};

use serde::de::DeserializeOwned;

use crate::error::WorkError;

/// Deserialize a handler config, mapping serde's message into a plain reason.
pub(crate) fn parse_config<T: DeserializeOwned>(config: &serde_json::Value) -> Result<T, String> {
    serde_json::from_value(config.clone()).map_err(|e| e.to_string())
}

/// Await a blocking walk, turning a panic or runtime shutdown into a failure.
pub(crate) async fn join_blocking<T, F>(f: F) -> Result<T, WorkError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, WorkError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| WorkError::Failed(format!("worker thread failed: {e}")))?
}
