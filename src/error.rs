use thiserror::Error;

/// Crate-wide error taxonomy (spec.md §7). Component-internal functions
/// return `Result<T, IngestError>`; task-spawning code and `main` wrap these
/// in `anyhow::Result` with additional context.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("stream error: {0}")]
    Stream(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("pricing error: {0}")]
    Pricing(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("reconciliation error: {0}")]
    Reconciliation(String),
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        IngestError::Persistence(err.to_string())
    }
}
