use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by a testbed.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine not initialized: {0}")]
    NotInitialized(String),

    #[error("Snapshot error on {}: {reason}", path.display())]
    Snapshot { path: PathBuf, reason: String },

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Training view {index} out of range ({count} views loaded)")]
    ViewOutOfRange { index: usize, count: usize },

    #[error("No window open; call init_window before taking screenshots")]
    NoWindow,

    #[error("Data error: {0}")]
    Data(#[from] ngp_data::DataError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
