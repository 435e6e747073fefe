// error types for the evaluation harness.

use std::path::PathBuf;
use thiserror::Error;

// errors from a single chat completion call
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Request timeout")]
    Timeout,

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Parse error: {0}")]
    Decode(String),
}

impl CompletionError {
    // transient failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            CompletionError::Transport(_) | CompletionError::Timeout => true,
            CompletionError::Status { status, .. } => {
                matches!(status, 408 | 429) || *status >= 500
            }
            CompletionError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for CompletionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CompletionError::Timeout
        } else if err.is_decode() {
            CompletionError::Decode(err.to_string())
        } else {
            CompletionError::Transport(err.to_string())
        }
    }
}

// errors from the on-disk cache
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt cache entry {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Serialization error: {0}")]
    Encode(String),
}

// errors that abort a whole batch
#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Worker dropped request for key {0}")]
    WorkerLost(String),
}

// configuration errors, surfaced before any work starts
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid override '{0}', expected section.key=value")]
    InvalidOverride(String),

    #[error("Unknown chat template: {0}")]
    UnknownTemplate(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Invalid setting '{field}': {reason}")]
    Invalid { field: String, reason: String },
}

// errors while loading datasets and few-shot files
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid record at {path}:{line}: {reason}")]
    Record {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Missing field '{field}' in record {index}")]
    MissingField { field: String, index: usize },
}
