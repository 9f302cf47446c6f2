use ngp_data::DataError;
use ngp_engine::EngineError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while training.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Engine stopped at step {reached} before reaching step {target}")]
    Interrupted { target: u32, reached: u32 },

    #[error("Missing file: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Data(#[from] DataError),
}

pub type Result<T> = std::result::Result<T, TrainError>;
