use ngp_data::DataError;
use ngp_engine::EngineError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while rendering or extracting density.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Invalid render mode '{0}', expected one of: color, depth, confidence")]
    InvalidRenderMode(String),

    #[error("Invalid camera mode '{0}', expected one of: perspective, orthographic")]
    InvalidCameraMode(String),

    #[error("Manifest has {manifest} frames but the engine loaded {engine} training views")]
    FrameCountMismatch { manifest: usize, engine: usize },

    #[error("Missing file: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Training view {path} does not match its manifest frame: {detail}")]
    IntrinsicsMismatch { path: String, detail: String },

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Image error on {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Data(#[from] DataError),
}

pub type Result<T> = std::result::Result<T, RenderError>;
