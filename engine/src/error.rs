//! Engine-level errors.

use crate::cache::CacheError;

/// Error terminating an engine run.
///
/// Per-request failures never surface here; they are recorded in the
/// failure map and inspected after the run.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no requests to process")]
    EmptyInput,
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Error raised when a service configuration is rejected.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("max_concurrency must be at least 1")]
    Concurrency,
    #[error("limiter max_rate must be at least 1 and time_period non-zero")]
    Limiter,
    #[error("remote cache requires both save_state and load_state")]
    RemoteHooks,
    #[error("JSON cache path must end with .json, .jsonl or .json.gz: {0}")]
    JsonSuffix(String),
    #[error("binary cache path must end with .bin or .bin.gz: {0}")]
    BinarySuffix(String),
}

/// Error raised when a post-processing pipeline stage fails.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("pipeline stage failed: {0}")]
    Stage(String),
}

/// Error writing data items to disk.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("unsupported output extension: {0}")]
    Extension(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}
