use std::path::PathBuf;

use thiserror::Error;

/// Core error type for the evaluation harness.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidSetting {
        key: String,
        value: String,
        reason: String,
    },
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("dataset not found: {0}")]
    DatasetNotFound(String),
    #[error("I/O error while accessing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("evaluation backend request failed: {0}")]
    Backend(#[from] reqwest::Error),
    #[error("invalid example {id}: {reason}")]
    InvalidExample { id: String, reason: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EvalError {
    pub fn invalid_setting(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidSetting {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = EvalError> = std::result::Result<T, E>;
