use std::path::PathBuf;

/// Core error type for the cleanup engine.
///
/// Adapter crates map their specific failures into this type so a run can
/// abort consistently no matter which collaborator failed.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("malformed blacklist entry `{value}`: {reason}")]
    MalformedEntry { value: String, reason: String },

    #[error("provider error: {0}")]
    Provider(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid path: {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
