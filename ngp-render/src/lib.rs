//! NGP Render Crate
//!
//! Everything that reads a trained snapshot back out of the engine.
//!
//! ## Modules
//!
//! - [`mode`]: render and camera modes, resolved to engine settings
//! - [`tonemap`]: alpha, sRGB and depth post-processing of rendered buffers
//! - [`renderer`]: renders a camera transform manifest frame by frame
//! - [`density`]: splits the render box into cubes and extracts density grids

mod error;
pub mod density;
pub mod mode;
mod progress;
pub mod renderer;
pub mod tonemap;

pub use density::{
    Cube, CubeGrid, DensityCubeInfo, DensityOptions, DensityOutput, DensitySummary, extract_density,
};
pub use error::{RenderError, Result};
pub use mode::{CameraMode, ModeSettings, RenderMode};
pub use renderer::{
    CameraRenderer, CameraSource, RenderOptions, RenderSummary, verify_training_view_intrinsics,
};
