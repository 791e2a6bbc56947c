#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use reel_core::config::{ReelConfig, SchedulerConfig};
use reel_gateway::app::{build_router, AppState};
use reel_jobs::{
    HandlerRegistry, JobContext, JobHandler, JobId, JobManager, JobRepository, JobState,
    WorkError,
};
use serde_json::Value;
use tower::ServiceExt;

/// Runs until cancelled.
pub struct Block;

#[async_trait]
impl JobHandler for Block {
    fn job_type(&self) -> &str {
        "block"
    }
    fn validate(&self, _: &Value) -> Result<(), String> {
        Ok(())
    }
    async fn run(&self, ctx: JobContext) -> Result<String, WorkError> {
        tokio::select! {
            _ = ctx.cancelled() => Err(WorkError::Cancelled),
            _ = tokio::time::sleep(Duration::from_secs(30)) => Ok("never cancelled".to_string()),
        }
    }
}

pub struct TestApp {
    pub state: Arc<AppState>,
    pub router: Router,
}

pub fn app(persist: bool) -> TestApp {
    let mut registry = HandlerRegistry::with_builtins();
    registry.register(Block);
    let scheduler = SchedulerConfig {
        tick_interval_ms: 20,
        history_retention: 10,
        subscriber_buffer: 64,
        keepalive_secs: 1,
    };
    let manager = Arc::new(JobManager::new(scheduler, registry));
    let repo = persist.then(|| JobRepository::in_memory().unwrap());
    let state = Arc::new(AppState::new(ReelConfig::default(), manager, repo));
    let router = build_router(Arc::clone(&state));
    TestApp { state, router }
}

impl TestApp {
    pub async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.raw(request).await
    }

    pub async fn raw(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    pub async fn wait_idle(&self, id: &str) {
        let id = JobId::from(id);
        for _ in 0..500 {
            if self.state.manager.get_job(&id).unwrap().state == JobState::Idle {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} never went idle");
    }
}
