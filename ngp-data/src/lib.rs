//! NGP Data Crate
//!
//! Engine-agnostic data handling for NeRF scene pipelines: camera transform
//! manifests, engine scene configuration, bounding boxes, `.npy` array files
//! and the run context that collects profiling events.
//!
//! ## Modules
//!
//! - [`manifest`]: camera transform manifests (`transforms.json` layout)
//! - [`scene_config`]: engine scene configuration (scale, render AABB)
//! - [`bbox`]: axis-aligned bounding boxes in engine space
//! - [`npy`]: minimal NumPy `.npy` reader/writer for `f32` arrays
//! - [`profile`]: scoped stage timers and Chrome trace export
//! - [`json`]: JSON file helpers

pub mod bbox;
pub mod error;
pub mod json;
pub mod manifest;
pub mod npy;
pub mod profile;
pub mod scene_config;

pub use bbox::BoundingBox;
pub use error::{DataError, Result};
pub use manifest::{CameraIntrinsics, Frame, LensMode, TransformManifest};
pub use profile::{ProfileEvent, RunContext, ScopeTimer};
pub use scene_config::SceneConfig;
