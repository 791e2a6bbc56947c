use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness probe with a little manager metadata.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let manager = &state.manager;
    Json(json!({
        "status": if manager.is_stopped() { "stopping" } else { "ok" },
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "jobs": manager.get_jobs().len(),
        "job_types": manager.registry().types(),
        "subscribers": manager.event_bus().subscriber_count(),
        "dropped_updates": manager.event_bus().dropped_count(),
        "persistence": state.repo.is_some(),
    }))
}
