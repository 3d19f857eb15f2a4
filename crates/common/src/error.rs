use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflicting state: {0}")]
    ConflictingState(String),

    #[error("account {account_id} is quarantined until {release_at}")]
    QuarantinedError {
        account_id: String,
        release_at: chrono::DateTime<chrono::Utc>,
    },

    #[error("persistence error: {0}")]
    PersistenceError(String),

    #[error("telegram client error: {0}")]
    Telegram(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
