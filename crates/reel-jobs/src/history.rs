use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::types::{Execution, ExecutionId, ExecutionStatus, JobId, Trigger};

/// Per-job capped log of executions, oldest first internally.
///
/// Appends for one job are serialised by the ledger lock, so entries land in
/// execution-start order even when forced runs overlap.
pub struct HistoryLedger {
    retention: usize,
    next_id: AtomicU64,
    logs: Mutex<HashMap<JobId, VecDeque<Execution>>>,
}

impl HistoryLedger {
    pub fn new(retention: usize) -> Self {
        Self {
            retention: retention.max(1),
            next_id: AtomicU64::new(1),
            logs: Mutex::new(HashMap::new()),
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Create a `running` execution and append it, evicting the oldest
    /// entries beyond the retention cap.
    pub fn start(&self, job_id: &JobId, trigger: Trigger, started_at: DateTime<Utc>) -> Execution {
        let execution = Execution {
            execution_id: self.next_id.fetch_add(1, Ordering::Relaxed),
            job_id: job_id.clone(),
            trigger,
            started_at,
            ended_at: None,
            status: ExecutionStatus::Running,
            message: None,
            error: None,
        };

        let mut logs = self.logs.lock();
        let log = logs.entry(job_id.clone()).or_default();
        log.push_back(execution.clone());
        while log.len() > self.retention {
            if let Some(evicted) = log.pop_front() {
                debug!(job_id = %job_id, execution_id = evicted.execution_id, "history entry evicted");
            }
        }
        execution
    }

    /// Record the terminal outcome of an execution. Returns the updated record,
    /// or `None` if it was already evicted.
    pub fn finish(
        &self,
        job_id: &JobId,
        execution_id: ExecutionId,
        status: ExecutionStatus,
        message: Option<String>,
        error: Option<String>,
        ended_at: DateTime<Utc>,
    ) -> Option<Execution> {
        let mut logs = self.logs.lock();
        let execution = logs
            .get_mut(job_id)?
            .iter_mut()
            .rev()
            .find(|e| e.execution_id == execution_id)?;
        execution.status = status;
        execution.message = message;
        execution.error = error;
        execution.ended_at = Some(ended_at);
        Some(execution.clone())
    }

    /// Most recent first, at most `limit` entries.
    pub fn list(&self, job_id: &JobId, limit: usize) -> Vec<Execution> {
        self.logs
            .lock()
            .get(job_id)
            .map(|log| log.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, job_id: &JobId, execution_id: ExecutionId) -> Option<Execution> {
        self.logs
            .lock()
            .get(job_id)?
            .iter()
            .find(|e| e.execution_id == execution_id)
            .cloned()
    }

    /// Forget a job's history entirely (used when the job is removed).
    pub fn remove(&self, job_id: &JobId) {
        self.logs.lock().remove(job_id);
    }
}
