use thiserror::Error;

use crate::domain::{Game, Playtype, UserId};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Unsupported game/playtype combination: {game} {playtype}")]
    UnknownGamePlaytype { game: Game, playtype: Playtype },

    #[error("Environment variable error: {0}")]
    Env(#[from] std::env::VarError),
}

pub type Result<T> = std::result::Result<T, IngestError>;

/// Failures raised by score and catalog storage backends.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("uniqueness conflict: {0}")]
    Conflict(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict(e.to_string())
            }
            _ => StoreError::Backend(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Backend(format!("record (de)serialization failed: {}", e))
    }
}

/// Errors that end an import job. Outcomes gathered before the error are kept.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ImportFatalError {
    #[error("an import is already in progress for user {0}")]
    ImportInProgress(UserId),

    #[error("malformed pagination envelope from {url}: {reason}")]
    MalformedEnvelope { url: String, reason: String },

    #[error("refusing to follow {got}: origin does not match {expected}")]
    OriginMismatch { expected: String, got: String },

    #[error("pagination did not terminate after {0} pages")]
    PageLimitExceeded(u32),

    #[error("authentication failed again after reauthenticating")]
    ReauthExhausted,

    #[error("reauthentication failed: {0}")]
    ReauthFailed(String),

    #[error("no stored credentials for {service}")]
    MissingCredentials { service: String },

    #[error("unexpected status {status} from {url}")]
    UpstreamStatus { url: String, status: u16 },

    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("invalid import input: {0}")]
    InvalidInput(String),

    #[error("store failure: {0}")]
    Store(#[from] StoreError),
}
