use std::path::PathBuf;
use thiserror::Error;

/// Failures crossing the process/transport boundary.
///
/// Parse failures never show up here; they are skipped field by field.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Engine process is not running")]
    NotRunning,

    #[error("Engine process is already running (generation {0})")]
    AlreadyRunning(u64),

    #[error("Failed to write to engine: {0}")]
    Write(String),

    #[error("Failed to end player process")]
    StopTimeout,

    #[error("Invalid output pattern '{name}': {source}")]
    Pattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("No media set")]
    NoMedia,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type EngineResult<T> = Result<T, EngineError>;
