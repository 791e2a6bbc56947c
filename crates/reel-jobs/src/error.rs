use thiserror::Error;

/// Errors returned synchronously by the job manager.
#[derive(Debug, Error)]
pub enum JobError {
    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    NotFound { id: String },

    /// The operation is not allowed in the job's current state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A job definition or patch failed validation. Nothing was changed.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// The request itself does not apply (e.g. cancelling an idle job).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The manager has been stopped and accepts no new work.
    #[error("Job manager is stopped")]
    Stopped,

    /// Underlying SQLite / rusqlite error from the job repository.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl JobError {
    pub fn not_found(id: impl Into<String>) -> Self {
        JobError::NotFound { id: id.into() }
    }

    /// Short error code string sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            JobError::NotFound { .. } => "NOT_FOUND",
            JobError::Conflict(_) => "CONFLICT",
            JobError::InvalidConfig(_) => "INVALID_CONFIG",
            JobError::InvalidRequest(_) => "INVALID_REQUEST",
            JobError::Stopped => "STOPPED",
            JobError::Database(_) => "DATABASE_ERROR",
            JobError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

/// Failure of a job's unit of work. Recorded on the execution, never returned
/// to the caller that triggered the run.
#[derive(Debug, Error)]
pub enum WorkError {
    /// The work observed its cancellation token and stopped early.
    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, JobError>;
