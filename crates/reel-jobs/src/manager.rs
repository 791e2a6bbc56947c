use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Utc;
use parking_lot::Mutex;
use reel_core::config::SchedulerConfig;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    engine::SchedulerLoop,
    error::{JobError, Result},
    events::{EventBus, Subscription},
    executor::Executor,
    handler::HandlerRegistry,
    history::HistoryLedger,
    store::JobStore,
    types::{Execution, Job, JobId, JobPatch, NewJob, Trigger},
};

struct SchedulerTask {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owns job definitions, history and the event bus, and drives the
/// scheduler loop. All job operations go through here.
///
/// Lock order is store, then ledger, then bus.
pub struct JobManager {
    config: SchedulerConfig,
    store: Arc<Mutex<JobStore>>,
    ledger: Arc<HistoryLedger>,
    bus: Arc<EventBus>,
    registry: Arc<HandlerRegistry>,
    executor: Arc<Executor>,
    scheduler: Mutex<Option<SchedulerTask>>,
    stopped: AtomicBool,
}

impl JobManager {
    pub fn new(config: SchedulerConfig, registry: HandlerRegistry) -> Self {
        let config = config.normalized();
        let store = Arc::new(Mutex::new(JobStore::new()));
        let ledger = Arc::new(HistoryLedger::new(config.history_retention));
        let bus = Arc::new(EventBus::new(config.subscriber_buffer));
        let registry = Arc::new(registry);
        let executor = Arc::new(Executor::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            Arc::clone(&bus),
            Arc::clone(&registry),
        ));
        Self {
            config,
            store,
            ledger,
            bus,
            registry,
            executor,
            scheduler: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    // ── definitions ───────────────────────────────────────────────────────────

    /// Create a job. Duplicate ids are a `Conflict`.
    pub fn add_job(&self, new: NewJob) -> Result<Job> {
        let job = self.store.lock().insert(new, &self.registry, Utc::now())?;
        info!(job_id = %job.id, job_type = %job.job_type, schedule = %job.schedule, "job added");
        Ok(job)
    }

    /// Re-register a stored definition (e.g. loaded from the repository).
    pub fn restore_job(&self, job: Job) -> Result<Job> {
        let job = self.store.lock().restore(job, &self.registry, Utc::now())?;
        info!(job_id = %job.id, "job restored");
        Ok(job)
    }

    /// Delete an idle job and its history.
    pub fn remove_job(&self, id: &JobId) -> Result<Job> {
        let mut store = self.store.lock();
        let job = store.remove(id)?;
        self.ledger.remove(id);
        drop(store);
        info!(job_id = %id, "job removed");
        Ok(job)
    }

    /// All jobs, ordered by id.
    pub fn get_jobs(&self) -> Vec<Job> {
        self.store.lock().list()
    }

    pub fn get_job(&self, id: &JobId) -> Result<Job> {
        self.store.lock().get(id)
    }

    /// Patch a job definition. Refused while it runs.
    pub fn update_job(&self, id: &JobId, patch: JobPatch) -> Result<Job> {
        let job = self
            .store
            .lock()
            .update(id, patch, &self.registry, Utc::now())?;
        info!(job_id = %id, enabled = job.enabled, schedule = %job.schedule, "job updated");
        Ok(job)
    }

    // ── execution ─────────────────────────────────────────────────────────────

    /// Manually trigger a run. Returns as soon as the run is accepted.
    pub fn run_job(&self, id: &JobId, force: bool) -> Result<Execution> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(JobError::Stopped);
        }
        self.executor.run_job(id, force, Trigger::Manual)
    }

    /// Signal every in-flight execution of `id` to stop.
    pub fn cancel_job(&self, id: &JobId) -> Result<()> {
        self.executor.cancel_job(id)
    }

    /// Newest first, at most `limit`.
    pub fn get_job_executions(&self, id: &JobId, limit: usize) -> Result<Vec<Execution>> {
        let store = self.store.lock();
        store.entry(id)?;
        Ok(self.ledger.list(id, limit))
    }

    // ── events ────────────────────────────────────────────────────────────────

    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        self.bus.unsubscribe(subscription)
    }

    // ── lifecycle ─────────────────────────────────────────────────────────────

    /// Spawn the scheduler loop. Calling it again is a no-op.
    pub fn start(&self) {
        if self.stopped.load(Ordering::Acquire) {
            warn!("job manager already stopped; start ignored");
            return;
        }
        let mut slot = self.scheduler.lock();
        if slot.is_some() {
            return;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler = SchedulerLoop::new(
            Arc::clone(&self.store),
            Arc::clone(&self.executor),
            Duration::from_millis(self.config.tick_interval_ms),
        );
        let handle = tokio::spawn(scheduler.run(shutdown_rx));
        *slot = Some(SchedulerTask {
            shutdown_tx,
            handle,
        });
        info!(
            tick_ms = self.config.tick_interval_ms,
            retention = self.ledger.retention(),
            "job manager started"
        );
    }

    /// Stop the scheduler, cancel in-flight work, wait for it to settle and
    /// close every subscription. Terminal.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let task = self.scheduler.lock().take();
        if let Some(task) = task {
            let _ = task.shutdown_tx.send(true);
            if let Err(e) = task.handle.await {
                warn!("scheduler loop ended abnormally: {e}");
            }
        }

        self.executor.shutdown().await;
        self.bus.close_all();
        info!("job manager stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire) || self.executor.is_stopped()
    }
}
