//! The capability surface consumed from the volumetric engine.

use crate::error::Result;
use glam::{Affine3A, UVec3};
use image::Rgba32FImage;
use ngp_data::{BoundingBox, CameraIntrinsics, LensMode};
use std::path::Path;

/// What the engine writes into the color channels of a rendered buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineRenderMode {
    #[default]
    Shade,
    /// Ray termination distance in every color channel.
    Depth,
    Confidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorSpace {
    Linear,
    #[default]
    Srgb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TonemapCurve {
    #[default]
    Identity,
    Aces,
    Hable,
    Reinhard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Projection {
    #[default]
    Perspective,
    Orthographic,
}

/// Render parameters applied to the engine before a batch of frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSettings {
    pub mode: EngineRenderMode,
    pub color_space: ColorSpace,
    pub tonemap_curve: TonemapCurve,
    /// Exposure bias in stops. Color channels of rendered buffers are
    /// scaled by `2^exposure`, depth and confidence included.
    pub exposure: f32,
    /// Horizontal field of view in degrees, when rendering from explicit poses.
    pub fov_degrees: Option<f32>,
    pub projection: Projection,
    pub camera_distortion: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            mode: EngineRenderMode::Shade,
            color_space: ColorSpace::Srgb,
            tonemap_curve: TonemapCurve::Identity,
            exposure: 0.0,
            fov_degrees: None,
            projection: Projection::Perspective,
            camera_distortion: true,
        }
    }
}

/// A training view as loaded by the engine, with the metadata it derived.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingView {
    pub path: String,
    pub intrinsics: CameraIntrinsics,
}

impl TrainingView {
    /// Lens parameters in the engine's 7-slot layout `(k1, k2, p1, p2, 0, 0, 0)`.
    pub fn lens_params(&self) -> [f32; 7] {
        let [k1, k2, p1, p2] = self.intrinsics.distortion;
        [k1, k2, p1, p2, 0.0, 0.0, 0.0]
    }

    pub fn lens_mode(&self) -> LensMode {
        self.intrinsics.lens
    }
}

/// Densities sampled on a regular grid, `x` varying fastest.
#[derive(Debug, Clone, PartialEq)]
pub struct DensityGrid {
    pub resolution: UVec3,
    pub values: Vec<f32>,
}

impl DensityGrid {
    pub fn get(&self, x: u32, y: u32, z: u32) -> f32 {
        let r = self.resolution;
        self.values[(x + y * r.x + z * r.x * r.y) as usize]
    }

    /// Array shape in C order, `(z, y, x)`.
    pub fn shape(&self) -> [usize; 3] {
        let r = self.resolution;
        [r.z as usize, r.y as usize, r.x as usize]
    }
}

/// Operations the pipeline drives on the volumetric engine.
///
/// All calls block until the engine returns. Engine failures are reported
/// as [`EngineError`](crate::EngineError) and are not interpreted by callers.
pub trait Testbed {
    /// Load a camera transform manifest as the training dataset.
    fn load_training_data(&mut self, manifest: &Path) -> Result<()>;

    /// Views of the loaded training dataset, in engine order.
    fn training_views(&self) -> &[TrainingView];

    fn load_snapshot(&mut self, path: &Path) -> Result<()>;

    fn save_snapshot(&mut self, path: &Path) -> Result<()>;

    /// Reset the model from a network configuration file.
    fn reload_network(&mut self, config: &Path) -> Result<()>;

    fn set_training(&mut self, enabled: bool);

    fn set_depth_supervision_lambda(&mut self, lambda: f32);

    /// Advance one engine frame: one training step while training is
    /// enabled, one accumulation sample otherwise. Returns `false` when the
    /// engine wants to stop (e.g. its window was closed).
    fn frame(&mut self) -> Result<bool>;

    fn training_step(&self) -> u32;

    fn loss(&self) -> f32;

    fn apply_render_settings(&mut self, settings: &RenderSettings);

    /// Open an on-screen window of the given size.
    fn init_window(&mut self, width: u32, height: u32) -> Result<()>;

    /// Set the active camera from a camera-to-world pose.
    fn set_camera_matrix(&mut self, camera: &Affine3A);

    /// Set the active camera, including intrinsics, to a loaded training view.
    fn set_camera_to_training_view(&mut self, index: usize) -> Result<()>;

    fn reset_accumulation(&mut self);

    /// Render an off-screen RGBA buffer with premultiplied alpha.
    fn render(&mut self, width: u32, height: u32, spp: u32) -> Result<Rgba32FImage>;

    /// Read back the accumulated on-screen image.
    fn screenshot(&mut self) -> Result<Rgba32FImage>;

    /// Sample the density field on a `resolution`³ grid spanning `aabb`.
    fn compute_density_grid(&mut self, resolution: u32, aabb: &BoundingBox) -> Result<DensityGrid>;
}
