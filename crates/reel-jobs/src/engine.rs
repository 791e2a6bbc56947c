use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::{sync::watch, time::MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{
    error::JobError,
    executor::Executor,
    store::JobStore,
    types::Trigger,
};

/// Periodic due-job scan. Running jobs are skipped, never queued.
pub(crate) struct SchedulerLoop {
    store: Arc<Mutex<JobStore>>,
    executor: Arc<Executor>,
    tick: Duration,
}

impl SchedulerLoop {
    pub fn new(store: Arc<Mutex<JobStore>>, executor: Arc<Executor>, tick: Duration) -> Self {
        Self {
            store,
            executor,
            tick,
        }
    }

    /// Main loop. Ticks until `shutdown` broadcasts `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(tick_ms = self.tick.as_millis() as u64, "scheduler loop started");

        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(Utc::now());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler loop shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Start every job due at `now`. Returns how many runs were accepted.
    pub fn tick(&self, now: DateTime<Utc>) -> usize {
        // Collect first so the store lock is released before run_job takes it.
        let due = self.store.lock().due(now);
        let mut started = 0;

        for id in due {
            match self.executor.run_job(&id, false, Trigger::Scheduled) {
                Ok(_) => started += 1,
                // State moved between the scan and the run request.
                Err(e @ (JobError::Conflict(_) | JobError::InvalidRequest(_) | JobError::NotFound { .. })) => {
                    debug!(job_id = %id, "scheduled run skipped: {e}");
                }
                Err(JobError::Stopped) => break,
                Err(e) => warn!(job_id = %id, "scheduled run rejected: {e}"),
            }
        }
        started
    }
}
