use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Invalid period: {0}")]
    InvalidPeriod(String),

    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("Source error for {entity_id}: {message}")]
    Source { entity_id: String, message: String },

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Queued task panicked: {0}")]
    TaskPanicked(String),

    #[error("Queued task was cleared before it started")]
    TaskCancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
