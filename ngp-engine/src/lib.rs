//! NGP Engine Crate
//!
//! The volumetric engine that trains and renders NeRF scenes is an opaque
//! native library. This crate describes what the pipeline needs from it as
//! the [`Testbed`] trait and provides [`SyntheticTestbed`], a deterministic
//! CPU implementation used for dry runs and tests. A native backend plugs in
//! by implementing [`Testbed`].

mod error;
mod synthetic;
mod testbed;

pub use error::{EngineError, Result};
pub use synthetic::{EngineStats, SyntheticTestbed};
pub use testbed::{
    ColorSpace, DensityGrid, EngineRenderMode, Projection, RenderSettings, Testbed, TonemapCurve,
    TrainingView,
};
