use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{JobError, Result},
    handler::HandlerRegistry,
    schedule::Schedule,
    types::{ExecutionId, Job, JobId, JobPatch, JobState, NewJob},
};

/// Cancellation handle of one accepted, unsettled execution.
#[derive(Debug)]
pub(crate) struct InFlight {
    pub token: CancellationToken,
    pub cancelling: bool,
}

/// A job definition plus the executions currently running for it.
#[derive(Debug)]
pub(crate) struct JobEntry {
    pub job: Job,
    pub inflight: BTreeMap<ExecutionId, InFlight>,
}

impl JobEntry {
    fn new(job: Job) -> Self {
        Self {
            job,
            inflight: BTreeMap::new(),
        }
    }

    pub fn is_busy(&self) -> bool {
        !self.inflight.is_empty()
    }

    /// Derive `state` from the in-flight set. `Cancelling` only when every
    /// in-flight execution has been asked to stop.
    pub fn refresh_state(&mut self) {
        self.job.state = if self.inflight.is_empty() {
            JobState::Idle
        } else if self.inflight.values().all(|f| f.cancelling) {
            JobState::Cancelling
        } else {
            JobState::Running
        };
    }
}

/// `nextRunAt` for a job as of `from`. Disabled and manual jobs never have one.
pub(crate) fn next_run_for(job: &Job, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if !job.enabled {
        return None;
    }
    job.schedule.next_run(from)
}

fn check_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(JobError::InvalidConfig("name must not be empty".to_string()));
    }
    Ok(name.to_string())
}

fn check_id(id: &str) -> Result<JobId> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(JobError::InvalidConfig(format!(
            "invalid job id '{id}': use letters, digits, '-', '_' or '.'"
        )));
    }
    Ok(JobId::from(id))
}

fn parse_schedule(expr: &str) -> Result<Schedule> {
    expr.parse::<Schedule>()
        .map_err(|e| JobError::InvalidConfig(format!("invalid schedule '{expr}': {e}")))
}

/// In-memory job table, ordered by id. Callers hold the manager's store lock.
#[derive(Debug, Default)]
pub(crate) struct JobStore {
    jobs: BTreeMap<JobId, JobEntry>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> Vec<Job> {
        self.jobs.values().map(|e| e.job.clone()).collect()
    }

    pub fn get(&self, id: &JobId) -> Result<Job> {
        self.entry(id).map(|e| e.job.clone())
    }

    pub fn entry(&self, id: &JobId) -> Result<&JobEntry> {
        self.jobs
            .get(id)
            .ok_or_else(|| JobError::not_found(id.as_str()))
    }

    pub fn entry_mut(&mut self, id: &JobId) -> Result<&mut JobEntry> {
        self.jobs
            .get_mut(id)
            .ok_or_else(|| JobError::not_found(id.as_str()))
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut JobEntry> {
        self.jobs.values_mut()
    }

    /// Validate and insert a new definition.
    pub fn insert(
        &mut self,
        new: NewJob,
        registry: &HandlerRegistry,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        let id = match new.id.as_deref() {
            Some(id) => check_id(id.trim())?,
            None => JobId::new(),
        };
        if self.jobs.contains_key(&id) {
            return Err(JobError::Conflict(format!("job '{id}' already exists")));
        }
        let name = check_name(&new.name)?;
        let schedule = parse_schedule(&new.schedule)?;
        registry.validate(&new.job_type, &new.config)?;

        let mut job = Job {
            id: id.clone(),
            name,
            job_type: new.job_type,
            schedule,
            config: new.config,
            enabled: new.enabled,
            state: JobState::Idle,
            last_run_at: None,
            last_status: None,
            next_run_at: None,
            created_at: now,
            updated_at: now,
        };
        job.next_run_at = next_run_for(&job, now);

        self.jobs.insert(id, JobEntry::new(job.clone()));
        Ok(job)
    }

    /// Re-insert a previously stored definition, keeping its timestamps and
    /// last outcome. Transient state is reset.
    pub fn restore(
        &mut self,
        mut job: Job,
        registry: &HandlerRegistry,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        check_id(job.id.as_str())?;
        if self.jobs.contains_key(&job.id) {
            return Err(JobError::Conflict(format!("job '{}' already exists", job.id)));
        }
        job.name = check_name(&job.name)?;
        registry.validate(&job.job_type, &job.config)?;
        job.state = JobState::Idle;
        job.next_run_at = next_run_for(&job, now);

        self.jobs.insert(job.id.clone(), JobEntry::new(job.clone()));
        Ok(job)
    }

    /// Apply a patch. Everything is validated before anything changes.
    pub fn update(
        &mut self,
        id: &JobId,
        patch: JobPatch,
        registry: &HandlerRegistry,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        let entry = self.entry_mut(id)?;
        if entry.is_busy() {
            return Err(JobError::Conflict("job is running".to_string()));
        }

        let name = patch.name.as_deref().map(check_name).transpose()?;
        let schedule = patch.schedule.as_deref().map(parse_schedule).transpose()?;
        if let Some(config) = &patch.config {
            registry.validate(&entry.job.job_type, config)?;
        }

        let reschedule = schedule.is_some() || patch.enabled.is_some();
        let job = &mut entry.job;
        if let Some(name) = name {
            job.name = name;
        }
        if let Some(schedule) = schedule {
            job.schedule = schedule;
        }
        if let Some(config) = patch.config {
            job.config = config;
        }
        if let Some(enabled) = patch.enabled {
            job.enabled = enabled;
        }
        if reschedule {
            job.next_run_at = next_run_for(job, now);
        }
        job.updated_at = now;
        Ok(job.clone())
    }

    pub fn remove(&mut self, id: &JobId) -> Result<Job> {
        let entry = self.entry(id)?;
        if entry.is_busy() {
            return Err(JobError::Conflict("job is running".to_string()));
        }
        self.jobs
            .remove(id)
            .map(|e| e.job)
            .ok_or_else(|| JobError::not_found(id.as_str()))
    }

    /// Enabled, idle jobs whose `nextRunAt` has arrived.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<JobId> {
        self.jobs
            .values()
            .filter(|e| e.job.enabled && !e.is_busy())
            .filter(|e| e.job.next_run_at.is_some_and(|at| at <= now))
            .map(|e| e.job.id.clone())
            .collect()
    }
}
