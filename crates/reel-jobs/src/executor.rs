use std::{any::Any, sync::Arc};

use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info, warn};

use crate::{
    error::{JobError, Result, WorkError},
    events::EventBus,
    handler::{HandlerRegistry, JobContext, JobHandler, ProgressReporter},
    history::HistoryLedger,
    store::{next_run_for, InFlight, JobStore},
    types::{Execution, ExecutionId, ExecutionStatus, JobId, JobState, Trigger, UpdateKind},
};

/// Terminal result of one execution.
enum Outcome {
    Succeeded(String),
    Failed(String),
    Cancelled(Option<String>),
}

impl Outcome {
    fn classify(
        result: std::result::Result<std::result::Result<String, WorkError>, tokio::task::JoinError>,
        cancel_requested: bool,
    ) -> Self {
        match result {
            // Ran to completion even if a cancel arrived late.
            Ok(Ok(message)) => Outcome::Succeeded(message),
            Ok(Err(WorkError::Cancelled)) => Outcome::Cancelled(None),
            Ok(Err(e)) if cancel_requested => Outcome::Cancelled(Some(e.to_string())),
            Ok(Err(e)) => Outcome::Failed(e.to_string()),
            Err(e) if e.is_panic() => {
                Outcome::Failed(format!("job panicked: {}", panic_message(e.into_panic())))
            }
            Err(_) => Outcome::Cancelled(Some("task aborted".to_string())),
        }
    }

    fn status(&self) -> ExecutionStatus {
        match self {
            Outcome::Succeeded(_) => ExecutionStatus::Succeeded,
            Outcome::Failed(_) => ExecutionStatus::Failed,
            Outcome::Cancelled(_) => ExecutionStatus::Cancelled,
        }
    }

    fn update_kind(&self) -> UpdateKind {
        match self {
            Outcome::Succeeded(_) => UpdateKind::Completed,
            Outcome::Failed(_) => UpdateKind::Failed,
            Outcome::Cancelled(_) => UpdateKind::Cancelled,
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Runs handlers for accepted executions and settles their outcome.
///
/// Every state transition and its event happen under the store lock, so the
/// per-job event order matches the order of transitions.
pub(crate) struct Executor {
    store: Arc<Mutex<JobStore>>,
    ledger: Arc<HistoryLedger>,
    bus: Arc<EventBus>,
    registry: Arc<HandlerRegistry>,
    /// Parent of every execution token; cancelled once on shutdown.
    root: CancellationToken,
    tracker: TaskTracker,
}

impl Executor {
    pub fn new(
        store: Arc<Mutex<JobStore>>,
        ledger: Arc<HistoryLedger>,
        bus: Arc<EventBus>,
        registry: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            store,
            ledger,
            bus,
            registry,
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Accept a run and spawn its work. Returns the `running` execution.
    pub fn run_job(self: &Arc<Self>, id: &JobId, force: bool, trigger: Trigger) -> Result<Execution> {
        let mut store = self.store.lock();
        if self.root.is_cancelled() {
            return Err(JobError::Stopped);
        }
        let entry = store.entry_mut(id)?;
        if !entry.job.enabled && !force {
            return Err(JobError::InvalidRequest("job is disabled".to_string()));
        }
        if entry.is_busy() && !force {
            return Err(JobError::Conflict("job already running".to_string()));
        }
        let handler = self.registry.get(&entry.job.job_type).ok_or_else(|| {
            JobError::InvalidConfig(format!(
                "no handler registered for type '{}'",
                entry.job.job_type
            ))
        })?;

        let execution = self.ledger.start(id, trigger, Utc::now());
        let execution_id = execution.execution_id;
        let token = self.root.child_token();
        entry.inflight.insert(
            execution_id,
            InFlight {
                token: token.clone(),
                cancelling: false,
            },
        );
        entry.refresh_state();
        let overlapping = entry.inflight.len() > 1;

        self.bus
            .publish(id, execution_id, UpdateKind::Started, format!("{trigger} run started"));

        let ctx = JobContext::new(
            id.clone(),
            execution_id,
            trigger,
            entry.job.config.clone(),
            token.clone(),
            ProgressReporter::new(Arc::clone(&self.bus), id.clone(), execution_id),
        );
        let this = Arc::clone(self);
        self.tracker.spawn(async move { this.drive(handler, ctx, token).await });
        drop(store);

        info!(job_id = %id, execution_id, %trigger, force, overlapping, "job run accepted");
        Ok(execution)
    }

    async fn drive(self: Arc<Self>, handler: Arc<dyn JobHandler>, ctx: JobContext, token: CancellationToken) {
        let job_id = ctx.job_id.clone();
        let execution_id = ctx.execution_id;

        // Separate task so a panic surfaces as a JoinError instead of unwinding here.
        let result = tokio::spawn(async move { handler.run(ctx).await }).await;
        let outcome = Outcome::classify(result, token.is_cancelled());
        self.settle(&job_id, execution_id, outcome);
    }

    fn settle(&self, job_id: &JobId, execution_id: ExecutionId, outcome: Outcome) {
        let now = Utc::now();
        let status = outcome.status();
        let kind = outcome.update_kind();
        let (message, error, text) = match outcome {
            Outcome::Succeeded(msg) => (Some(msg.clone()), None, msg),
            Outcome::Failed(err) => (None, Some(err.clone()), err),
            Outcome::Cancelled(Some(err)) => (
                Some("cancelled".to_string()),
                Some(err.clone()),
                format!("cancelled: {err}"),
            ),
            Outcome::Cancelled(None) => {
                (Some("cancelled".to_string()), None, "cancelled".to_string())
            }
        };

        let mut store = self.store.lock();
        let record = self
            .ledger
            .finish(job_id, execution_id, status, message, error, now);
        match store.entry_mut(job_id) {
            Ok(entry) => {
                entry.inflight.remove(&execution_id);
                entry.job.last_status = Some(status);
                entry.job.last_run_at = Some(record.as_ref().map_or(now, |r| r.started_at));
                entry.job.next_run_at = next_run_for(&entry.job, now);
                entry.refresh_state();
            }
            Err(_) => warn!(job_id = %job_id, execution_id, "settled execution for a job that no longer exists"),
        }
        self.bus.publish(job_id, execution_id, kind, text.clone());
        drop(store);

        match status {
            ExecutionStatus::Failed => {
                error!(job_id = %job_id, execution_id, error = %text, "job run failed")
            }
            _ => info!(job_id = %job_id, execution_id, %status, "job run finished"),
        }
    }

    /// Request cancellation of every in-flight execution of a job.
    pub fn cancel_job(&self, id: &JobId) -> Result<()> {
        let mut store = self.store.lock();
        let entry = store.entry_mut(id)?;
        if !entry.is_busy() {
            return Err(JobError::InvalidRequest("job is not running".to_string()));
        }
        if entry.job.state == JobState::Cancelling {
            return Ok(());
        }
        for (execution_id, inflight) in entry.inflight.iter_mut() {
            if inflight.cancelling {
                continue;
            }
            inflight.cancelling = true;
            inflight.token.cancel();
            self.bus
                .publish(id, *execution_id, UpdateKind::Cancelling, "cancellation requested");
            info!(job_id = %id, execution_id = *execution_id, "cancellation requested");
        }
        entry.refresh_state();
        Ok(())
    }

    /// Reject new runs, cancel everything in flight and wait for it to settle.
    pub async fn shutdown(&self) {
        {
            let mut store = self.store.lock();
            if !self.root.is_cancelled() {
                for entry in store.entries_mut() {
                    let job_id = entry.job.id.clone();
                    for (execution_id, inflight) in entry.inflight.iter_mut() {
                        if !inflight.cancelling {
                            inflight.cancelling = true;
                            self.bus.publish(
                                &job_id,
                                *execution_id,
                                UpdateKind::Cancelling,
                                "manager stopping",
                            );
                        }
                    }
                    entry.refresh_state();
                }
                self.root.cancel();
            }
        }

        self.tracker.close();
        let pending = self.tracker.len();
        if pending > 0 {
            info!(pending, "waiting for in-flight executions to settle");
        }
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_outcomes() {
        let ok: std::result::Result<_, tokio::task::JoinError> = Ok(Ok("done".to_string()));
        assert!(matches!(Outcome::classify(ok, true), Outcome::Succeeded(_)));

        let cancelled = Ok(Err(WorkError::Cancelled));
        assert!(matches!(
            Outcome::classify(cancelled, false),
            Outcome::Cancelled(None)
        ));

        let late = Ok(Err(WorkError::Failed("io".into())));
        assert!(matches!(
            Outcome::classify(late, true),
            Outcome::Cancelled(Some(_))
        ));

        let failed = Ok(Err(WorkError::Failed("io".into())));
        assert!(matches!(Outcome::classify(failed, false), Outcome::Failed(_)));
    }

    #[tokio::test]
    async fn panics_become_failures() {
        let fail = true;
        let result = tokio::spawn(async move {
            if fail {
                panic!("boom");
            }
            Ok::<String, WorkError>(String::new())
        })
        .await;
        match Outcome::classify(result, false) {
            Outcome::Failed(msg) => assert_eq!(msg, "job panicked: boom"),
            _ => panic!("expected failure"),
        }
    }
}
