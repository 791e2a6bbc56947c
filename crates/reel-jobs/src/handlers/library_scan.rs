use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;
use walkdir::WalkDir;

use super::{join_blocking, parse_config};
use crate::{
    error::WorkError,
    handler::{JobContext, JobHandler},
};

/// Extensions counted when the job config does not list its own.
pub const MEDIA_EXTENSIONS: &[&str] = &[
    // video
    "mkv", "mp4", "m4v", "avi", "mov", "webm", "ts", "wmv",
    // audio
    "mp3", "flac", "m4a", "aac", "ogg", "opus", "wav",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LibraryScanConfig {
    /// Library root to walk.
    pub path: PathBuf,
    /// Lowercase extensions without the dot; defaults to [`MEDIA_EXTENSIONS`].
    #[serde(default)]
    pub extensions: Option<Vec<String>>,
    /// Publish a progress update every N media files.
    #[serde(default = "default_progress_every")]
    pub progress_every: u64,
}

fn default_progress_every() -> u64 {
    100
}

impl LibraryScanConfig {
    fn check(&self) -> Result<(), String> {
        if self.path.as_os_str().is_empty() {
            return Err("library_scan: 'path' must not be empty".to_string());
        }
        if self.progress_every == 0 {
            return Err("library_scan: 'progress_every' must be at least 1".to_string());
        }
        if let Some(exts) = &self.extensions {
            if exts.iter().any(|e| e.trim().is_empty()) {
                return Err("library_scan: 'extensions' must not contain empty entries".to_string());
            }
        }
        Ok(())
    }

    fn wanted_extensions(&self) -> Vec<String> {
        match &self.extensions {
            Some(exts) => exts
                .iter()
                .map(|e| e.trim().trim_start_matches('.').to_lowercase())
                .collect(),
            None => MEDIA_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ScanSummary {
    files: u64,
    media: u64,
    unreadable: u64,
}

fn is_media(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Walks a media library and counts the media files under it.
pub struct LibraryScan;

#[async_trait]
impl JobHandler for LibraryScan {
    fn job_type(&self) -> &str {
        "library_scan"
    }

    fn validate(&self, config: &serde_json::Value) -> Result<(), String> {
        parse_config::<LibraryScanConfig>(config)?.check()
    }

    async fn run(&self, ctx: JobContext) -> Result<String, WorkError> {
        let config: LibraryScanConfig = parse_config(&ctx.config).map_err(WorkError::Failed)?;
        config.check().map_err(WorkError::Failed)?;
        ctx.checkpoint()?;

        if !config.path.is_dir() {
            return Err(WorkError::Failed(format!(
                "library path {} is not a directory",
                config.path.display()
            )));
        }

        info!(job_id = %ctx.job_id, execution_id = ctx.execution_id, path = %config.path.display(), "library scan started");
        ctx.report(format!("scanning {}", config.path.display()));

        let cancel = ctx.cancellation_token();
        let reporter = ctx.reporter();
        let extensions = config.wanted_extensions();
        let root = config.path.clone();
        let every = config.progress_every;

        let summary = join_blocking(move || {
            let mut summary = ScanSummary::default();
            for entry in WalkDir::new(&root).follow_links(true) {
                if cancel.is_cancelled() {
                    return Err(WorkError::Cancelled);
                }
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(_) => {
                        summary.unreadable += 1;
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                summary.files += 1;
                if is_media(entry.path(), &extensions) {
                    summary.media += 1;
                    if summary.media % every == 0 {
                        reporter.report(format!("{} media files found", summary.media));
                    }
                }
            }
            Ok(summary)
        })
        .await?;

        info!(
            job_id = %ctx.job_id,
            execution_id = ctx.execution_id,
            files = summary.files,
            media = summary.media,
            unreadable = summary.unreadable,
            "library scan finished"
        );

        let mut message = format!(
            "scanned {} files, {} media files",
            summary.files, summary.media
        );
        if summary.unreadable > 0 {
            message.push_str(&format!(", {} unreadable entries", summary.unreadable));
        }
        Ok(message)
    }
}
