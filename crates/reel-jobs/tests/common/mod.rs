#![allow(dead_code)]

use std::time::Duration;

use async_trait::async_trait;
use reel_core::config::SchedulerConfig;
use reel_jobs::{
    Execution, HandlerRegistry, Job, JobContext, JobHandler, JobId, JobManager, JobState,
    NewJob, StatusUpdate, Subscription, WorkError,
};

pub const WAIT: Duration = Duration::from_secs(5);

/// Returns immediately.
pub struct Instant;

#[async_trait]
impl JobHandler for Instant {
    fn job_type(&self) -> &str {
        "instant"
    }
    fn validate(&self, _: &serde_json::Value) -> Result<(), String> {
        Ok(())
    }
    async fn run(&self, _: JobContext) -> Result<String, WorkError> {
        Ok("done".to_string())
    }
}

/// Runs until cancelled.
pub struct Block;

#[async_trait]
impl JobHandler for Block {
    fn job_type(&self) -> &str {
        "block"
    }
    fn validate(&self, _: &serde_json::Value) -> Result<(), String> {
        Ok(())
    }
    async fn run(&self, ctx: JobContext) -> Result<String, WorkError> {
        tokio::select! {
            _ = ctx.cancelled() => Err(WorkError::Cancelled),
            _ = tokio::time::sleep(Duration::from_secs(30)) => Ok("never cancelled".to_string()),
        }
    }
}

/// Notices cancellation late. With `{"finish": true}` it completes anyway,
/// otherwise it fails with a plain error.
pub struct Stubborn;

#[async_trait]
impl JobHandler for Stubborn {
    fn job_type(&self) -> &str {
        "stubborn"
    }
    fn validate(&self, _: &serde_json::Value) -> Result<(), String> {
        Ok(())
    }
    async fn run(&self, ctx: JobContext) -> Result<String, WorkError> {
        ctx.cancelled().await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        if ctx.config["finish"].as_bool().unwrap_or(false) {
            Ok("finished anyway".to_string())
        } else {
            Err(WorkError::Failed("interrupted mid-batch".to_string()))
        }
    }
}

/// Sleeps for `{"ms": N}` milliseconds (default 1500), then succeeds.
pub struct Slow;

#[async_trait]
impl JobHandler for Slow {
    fn job_type(&self) -> &str {
        "slow"
    }
    fn validate(&self, _: &serde_json::Value) -> Result<(), String> {
        Ok(())
    }
    async fn run(&self, ctx: JobContext) -> Result<String, WorkError> {
        let ms = ctx.config["ms"].as_u64().unwrap_or(1500);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok("slept".to_string())
    }
}

pub struct Fail;

#[async_trait]
impl JobHandler for Fail {
    fn job_type(&self) -> &str {
        "fail"
    }
    fn validate(&self, _: &serde_json::Value) -> Result<(), String> {
        Ok(())
    }
    async fn run(&self, _: JobContext) -> Result<String, WorkError> {
        Err(WorkError::Failed("disk on fire".to_string()))
    }
}

pub struct Panic;

#[async_trait]
impl JobHandler for Panic {
    fn job_type(&self) -> &str {
        "panic"
    }
    fn validate(&self, _: &serde_json::Value) -> Result<(), String> {
        Ok(())
    }
    async fn run(&self, ctx: JobContext) -> Result<String, WorkError> {
        if !ctx.is_cancelled() {
            panic!("boom");
        }
        Ok(String::new())
    }
}

pub fn registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::with_builtins();
    registry.register(Instant);
    registry.register(Block);
    registry.register(Stubborn);
    registry.register(Slow);
    registry.register(Fail);
    registry.register(Panic);
    registry
}

pub fn config() -> SchedulerConfig {
    SchedulerConfig {
        tick_interval_ms: 20,
        history_retention: 5,
        subscriber_buffer: 64,
        keepalive_secs: 30,
    }
}

pub fn manager() -> JobManager {
    JobManager::new(config(), registry())
}

pub fn new_job(id: &str, job_type: &str, schedule: &str) -> NewJob {
    NewJob {
        id: Some(id.to_string()),
        name: format!("{id} job"),
        job_type: job_type.to_string(),
        schedule: schedule.to_string(),
        config: serde_json::json!({}),
        enabled: true,
    }
}

pub fn add(manager: &JobManager, id: &str, job_type: &str) -> JobId {
    manager
        .add_job(new_job(id, job_type, "manual"))
        .expect("add job")
        .id
}

/// Poll until `check` holds for the job or the wait budget runs out.
pub async fn wait_for(manager: &JobManager, id: &JobId, check: impl Fn(&Job) -> bool) -> Job {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let job = manager.get_job(id).expect("job exists");
        if check(&job) {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting on job {id}: {job:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_idle(manager: &JobManager, id: &JobId) -> Job {
    wait_for(manager, id, |j| j.state == JobState::Idle).await
}

pub fn latest(manager: &JobManager, id: &JobId) -> Execution {
    manager
        .get_job_executions(id, 1)
        .expect("executions")
        .into_iter()
        .next()
        .expect("at least one execution")
}

pub async fn recv(sub: &mut Subscription) -> StatusUpdate {
    tokio::time::timeout(WAIT, sub.recv())
        .await
        .expect("timed out waiting for an update")
        .expect("subscription closed")
}
