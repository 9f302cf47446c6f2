//! Error types for the pipeline binary.

use ngp_data::DataError;
use ngp_engine::EngineError;
use ngp_render::RenderError;
use ngp_train::TrainError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Scene directory {} does not exist and no remote is configured", .0.display())]
    MissingScene(PathBuf),

    #[error("`{command}` failed: {reason}")]
    ExternalCommand { command: String, reason: String },

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Training failed: {0}")]
    Train(#[from] TrainError),

    #[error("Rendering failed: {0}")]
    Render(#[from] RenderError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Data(#[from] DataError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
