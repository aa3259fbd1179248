//! Error types for suite runs

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Baseline not found: {}", .0.display())]
    BaselineNotFound(PathBuf),

    #[error("Test list not found: {}", .0.display())]
    TestsNotFound(PathBuf),

    #[error("Last run results not found: {}", .0.display())]
    ResultsNotFound(PathBuf),

    #[error("Unknown test: {0}")]
    UnknownTest(String),

    #[error("Invalid request {target}: {reason}")]
    InvalidRequest { target: String, reason: String },

    #[error("Failed to read upload {}: {source}", .path.display())]
    Upload {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Core(#[from] baseliner_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML write error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type RunnerResult<T> = Result<T, RunnerError>;
