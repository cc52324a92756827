use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Scan cancelled")]
    Cancelled,
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::CacheUnavailable(e.to_string())
    }
}

/// Per-file failure to turn a video into a signature. Always recoverable:
/// the file is skipped and retried on the next scan.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
pub enum DecodeError {
    #[error("unable to read {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("no decodable frames in {path}")]
    NoFrames { path: String },

    #[error("decoding {path} timed out after {}s", .after.as_secs_f64())]
    Timeout { path: String, after: Duration },
}

impl DecodeError {
    pub fn unreadable(path: impl Into<String>, reason: impl ToString) -> Self {
        DecodeError::Unreadable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
