use thiserror::Error;

/// Errors shared across Reel crates (config loading, file and JSON handling).
#[derive(Debug, Error)]
pub enum ReelError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReelError {
    /// Short error code string sent to clients in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ReelError::Config(_) => "CONFIG_ERROR",
            ReelError::Serialization(_) => "SERIALIZATION_ERROR",
            ReelError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, ReelError>;
