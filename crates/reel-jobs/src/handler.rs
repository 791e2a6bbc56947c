use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{JobError, WorkError},
    events::EventBus,
    types::{ExecutionId, JobId, Trigger, UpdateKind},
};

/// The unit of work behind a job `type`.
///
/// Implementations must poll [`JobContext::checkpoint`] (or the token) at safe
/// boundaries, e.g. between files or batches. The executor never aborts work;
/// it only requests cancellation.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Stable identifier matched against `Job::job_type` (e.g. `"library_scan"`).
    fn job_type(&self) -> &str;

    /// Check a job's `config` before it is stored. Return a human-readable reason on failure.
    fn validate(&self, config: &serde_json::Value) -> Result<(), String>;

    /// Do the work. `Ok` carries the success message recorded on the execution.
    async fn run(&self, ctx: JobContext) -> Result<String, WorkError>;
}

/// Publishes `progress` updates for one execution. Cheap to clone into
/// blocking tasks.
#[derive(Clone)]
pub struct ProgressReporter {
    bus: Arc<EventBus>,
    job_id: JobId,
    execution_id: ExecutionId,
}

impl ProgressReporter {
    pub(crate) fn new(bus: Arc<EventBus>, job_id: JobId, execution_id: ExecutionId) -> Self {
        Self {
            bus,
            job_id,
            execution_id,
        }
    }

    pub fn report(&self, message: impl Into<String>) {
        self.bus
            .publish(&self.job_id, self.execution_id, UpdateKind::Progress, message);
    }
}

/// Everything a handler gets for one execution.
pub struct JobContext {
    pub job_id: JobId,
    pub execution_id: ExecutionId,
    pub trigger: Trigger,
    pub config: serde_json::Value,
    cancel: CancellationToken,
    progress: ProgressReporter,
}

impl JobContext {
    pub(crate) fn new(
        job_id: JobId,
        execution_id: ExecutionId,
        trigger: Trigger,
        config: serde_json::Value,
        cancel: CancellationToken,
        progress: ProgressReporter,
    ) -> Self {
        Self {
            job_id,
            execution_id,
            trigger,
            config,
            cancel,
            progress,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Safe-boundary check: `Err(Cancelled)` once cancellation was requested.
    pub fn checkpoint(&self) -> Result<(), WorkError> {
        if self.cancel.is_cancelled() {
            Err(WorkError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when cancellation is requested; handy inside `tokio::select!`.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Clone of the token, for work moved onto blocking threads.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn report(&self, message: impl Into<String>) {
        self.progress.report(message)
    }

    pub fn reporter(&self) -> ProgressReporter {
        self.progress.clone()
    }
}

/// Job type → handler lookup.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in job types.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(crate::handlers::LibraryScan);
        registry.register(crate::handlers::CacheCleanup);
        registry
    }

    /// Register a handler. A handler with the same type is replaced.
    pub fn register<H: JobHandler + 'static>(&mut self, handler: H) {
        self.handlers
            .insert(handler.job_type().to_string(), Arc::new(handler));
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    /// Registered types, sorted for deterministic output.
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Validate `config` against the handler for `job_type`.
    pub fn validate(&self, job_type: &str, config: &serde_json::Value) -> Result<(), JobError> {
        let handler = self
            .get(job_type)
            .ok_or_else(|| JobError::InvalidConfig(format!("unknown job type '{job_type}'")))?;
        if !config.is_object() {
            return Err(JobError::InvalidConfig(
                "config must be a JSON object".to_string(),
            ));
        }
        handler.validate(config).map_err(JobError::InvalidConfig)
    }
}
