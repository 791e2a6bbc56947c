use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::schedule::Schedule;

/// Stable identifier for a job. Config-declared jobs pick their own
/// (e.g. `library-scan`); jobs created at runtime get a UUIDv7 so ids sort
/// in creation order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Execution identifier. Allocated from a process-wide counter, so ids are
/// unique and increase in creation order.
pub type ExecutionId = u64;

/// Transient run state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Running,
    /// Cancellation was requested; waiting for the work to observe it.
    Cancelling,
}

impl JobState {
    pub fn is_busy(self) -> bool {
        !matches!(self, JobState::Idle)
    }
}

/// What caused an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Scheduled,
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Scheduled => write!(f, "scheduled"),
            Trigger::Manual => write!(f, "manual"),
        }
    }
}

/// Lifecycle of a single execution: `Running` then exactly one terminal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// A job definition plus its current bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub name: String,
    /// Selects the registered handler.
    #[serde(rename = "type")]
    pub job_type: String,
    pub schedule: Schedule,
    /// Handler-specific parameters, validated by the handler.
    pub config: serde_json::Value,
    pub enabled: bool,
    /// Best-effort when forced runs overlap; see `JobStore`.
    pub state: JobState,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_status: Option<ExecutionStatus>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    /// Generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub job_type: String,
    /// Schedule expression; parsed during validation.
    #[serde(default = "manual_schedule")]
    pub schedule: String,
    #[serde(default = "empty_config")]
    pub config: serde_json::Value,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

/// Partial update of a job definition. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPatch {
    #[serde(default)]
    pub name: Option<String>,
    /// Schedule expression; parsed during validation.
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl From<&reel_core::config::JobSeed> for NewJob {
    fn from(seed: &reel_core::config::JobSeed) -> Self {
        Self {
            id: Some(seed.id.clone()),
            name: seed.name.clone(),
            job_type: seed.job_type.clone(),
            schedule: seed.schedule.clone(),
            config: seed.config.clone(),
            enabled: seed.enabled,
        }
    }
}

fn manual_schedule() -> String {
    "manual".to_string()
}

fn empty_config() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn enabled_by_default() -> bool {
    true
}

/// One attempt to run a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub execution_id: ExecutionId,
    pub job_id: JobId,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Kind of transition carried by a [`StatusUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    Started,
    Progress,
    Completed,
    Failed,
    Cancelling,
    Cancelled,
}

impl UpdateKind {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UpdateKind::Completed | UpdateKind::Failed | UpdateKind::Cancelled
        )
    }
}

/// Immutable snapshot published on every job transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub job_id: JobId,
    pub execution_id: ExecutionId,
    pub status: UpdateKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}
