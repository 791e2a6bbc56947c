use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use reel_jobs::{Execution, Job, JobId, JobPatch, NewJob};
use serde::Deserialize;

use super::error::ApiError;
use crate::app::AppState;

const DEFAULT_EXECUTION_LIMIT: usize = 10;

#[derive(Debug, Default, Deserialize)]
pub struct RunParams {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExecutionParams {
    pub limit: Option<usize>,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| ApiError::bad_request(e.body_text()))
}

fn query<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    params
        .map(|Query(v)| v)
        .map_err(|e| ApiError::bad_request(e.body_text()))
}

/// GET /jobs
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<Job>> {
    Json(state.manager.get_jobs())
}

/// POST /jobs
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewJob>, JsonRejection>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let new = body(payload)?;
    let job = state.save_with(|manager| manager.add_job(new))?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /jobs/{id}
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.manager.get_job(&JobId::from(id))?))
}

/// PUT /jobs/{id}
pub async fn update_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<JobPatch>, JsonRejection>,
) -> Result<Json<Job>, ApiError> {
    let id = JobId::from(id);
    // Resolve the job first so an unknown id is a 404 even with a bad body.
    state.manager.get_job(&id)?;
    let patch = body(payload)?;
    let job = state.save_with(|manager| manager.update_job(&id, patch))?;
    Ok(Json(job))
}

/// DELETE /jobs/{id}
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = JobId::from(id);
    state.remove(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /jobs/{id}/run?force=<bool>
pub async fn run_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    params: Result<Query<RunParams>, QueryRejection>,
) -> Result<Json<Execution>, ApiError> {
    let params = query(params)?;
    let execution = state
        .manager
        .run_job(&JobId::from(id), params.force)
        .map_err(ApiError::for_run)?;
    Ok(Json(execution))
}

/// POST /jobs/{id}/cancel
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    let id = JobId::from(id);
    state.manager.cancel_job(&id)?;
    Ok(Json(state.manager.get_job(&id)?))
}

/// GET /jobs/{id}/executions?limit=<n>
pub async fn list_executions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    params: Result<Query<ExecutionParams>, QueryRejection>,
) -> Result<Json<Vec<Execution>>, ApiError> {
    let limit = query(params)?.limit.unwrap_or(DEFAULT_EXECUTION_LIMIT);
    Ok(Json(
        state.manager.get_job_executions(&JobId::from(id), limit)?,
    ))
}
