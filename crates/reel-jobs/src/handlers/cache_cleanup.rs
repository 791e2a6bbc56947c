use std::{
    fs,
    path::PathBuf,
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use super::{join_blocking, parse_config};
use crate::{
    error::WorkError,
    handler::{JobContext, JobHandler},
};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheCleanupConfig {
    /// Cache directory; only files beneath it are touched.
    pub path: PathBuf,
    /// Files not modified within this many hours are removed.
    pub max_age_hours: u64,
    /// Report what would be removed without deleting anything.
    #[serde(default)]
    pub dry_run: bool,
}

impl CacheCleanupConfig {
    fn check(&self) -> Result<(), String> {
        if self.path.as_os_str().is_empty() {
            return Err("cache_cleanup: 'path' must not be empty".to_string());
        }
        if self.max_age_hours == 0 {
            return Err("cache_cleanup: 'max_age_hours' must be at least 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct CleanupSummary {
    removed: u64,
    bytes: u64,
    errors: u64,
}

/// Removes stale files from a cache directory.
pub struct CacheCleanup;

#[async_trait]
impl JobHandler for CacheCleanup {
    fn job_type(&self) -> &str {
        "cache_cleanup"
    }

    fn validate(&self, config: &serde_json::Value) -> Result<(), String> {
        parse_config::<CacheCleanupConfig>(config)?.check()
    }

    async fn run(&self, ctx: JobContext) -> Result<String, WorkError> {
        let config: CacheCleanupConfig = parse_config(&ctx.config).map_err(WorkError::Failed)?;
        config.check().map_err(WorkError::Failed)?;
        ctx.checkpoint()?;

        if !config.path.is_dir() {
            return Err(WorkError::Failed(format!(
                "cache path {} is not a directory",
                config.path.display()
            )));
        }

        let max_age = Duration::from_secs(config.max_age_hours.saturating_mul(3600));
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let cancel = ctx.cancellation_token();
        let root = config.path.clone();
        let dry_run = config.dry_run;

        let summary = join_blocking(move || {
            let mut summary = CleanupSummary::default();
            for entry in WalkDir::new(&root).min_depth(1) {
                if cancel.is_cancelled() {
                    return Err(WorkError::Cancelled);
                }
                let Ok(entry) = entry else {
                    summary.errors += 1;
                    continue;
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(meta) = entry.metadata() else {
                    summary.errors += 1;
                    continue;
                };
                let stale = meta.modified().map(|m| m < cutoff).unwrap_or(false);
                if !stale {
                    continue;
                }
                if dry_run {
                    summary.removed += 1;
                    summary.bytes += meta.len();
                    continue;
                }
                match fs::remove_file(entry.path()) {
                    Ok(()) => {
                        summary.removed += 1;
                        summary.bytes += meta.len();
                    }
                    Err(e) => {
                        summary.errors += 1;
                        warn!(path = %entry.path().display(), error = %e, "failed to remove cache file");
                    }
                }
            }
            Ok(summary)
        })
        .await?;

        info!(
            job_id = %ctx.job_id,
            execution_id = ctx.execution_id,
            removed = summary.removed,
            bytes = summary.bytes,
            errors = summary.errors,
            dry_run,
            "cache cleanup finished"
        );

        let verb = if dry_run { "would remove" } else { "removed" };
        let mut message = format!("{verb} {} files ({} bytes)", summary.removed, summary.bytes);
        if summary.errors > 0 {
            message.push_str(&format!(", {} errors", summary.errors));
        }
        Ok(message)
    }
}
