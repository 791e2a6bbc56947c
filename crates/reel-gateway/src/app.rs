use std::{sync::Arc, time::Instant};

use axum::{
    routing::{get, post},
    Router,
};
use parking_lot::Mutex;
use reel_core::config::ReelConfig;
use reel_jobs::{Job, JobError, JobId, JobManager, JobRepository};
use tracing::error;

/// Central shared state, passed as `Arc<AppState>` to all handlers.
pub struct AppState {
    pub config: ReelConfig,
    pub manager: Arc<JobManager>,
    /// Present when `database.persist` is on.
    pub repo: Option<Mutex<JobRepository>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: ReelConfig, manager: Arc<JobManager>, repo: Option<JobRepository>) -> Self {
        Self {
            config,
            manager,
            repo: repo.map(Mutex::new),
            started_at: Instant::now(),
        }
    }

    /// Apply a definition change and write the result through to the
    /// repository. The repo lock is held across both steps so concurrent
    /// edits of one job reach SQLite in the order the manager applied them.
    /// The in-memory manager stays authoritative, so write failures are
    /// logged rather than returned.
    pub fn save_with<F>(&self, change: F) -> Result<Job, JobError>
    where
        F: FnOnce(&JobManager) -> Result<Job, JobError>,
    {
        let repo = self.repo.as_ref().map(|r| r.lock());
        let job = change(&self.manager)?;
        if let Some(repo) = &repo {
            if let Err(e) = repo.save_job(&job) {
                error!(job_id = %job.id, "failed to persist job: {e}");
            }
        }
        Ok(job)
    }

    /// Remove a job from the manager and the repository under the repo lock.
    pub fn remove(&self, id: &JobId) -> Result<Job, JobError> {
        let repo = self.repo.as_ref().map(|r| r.lock());
        let job = self.manager.remove_job(id)?;
        if let Some(repo) = &repo {
            if let Err(e) = repo.delete_job(id) {
                error!(job_id = %id, "failed to delete persisted job: {e}");
            }
        }
        Ok(job)
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    use crate::http::{events, health, jobs};

    Router::new()
        .route("/health", get(health::health_handler))
        .route("/jobs", get(jobs::list_jobs).post(jobs::create_job))
        .route("/jobs/events", get(events::job_events))
        .route(
            "/jobs/{id}",
            get(jobs::get_job).put(jobs::update_job).delete(jobs::delete_job),
        )
        .route("/jobs/{id}/run", post(jobs::run_job))
        .route("/jobs/{id}/cancel", post(jobs::cancel_job))
        .route("/jobs/{id}/executions", get(jobs::list_executions))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
