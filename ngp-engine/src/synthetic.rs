//! Deterministic CPU testbed.
//!
//! The scene is a unit sphere at the origin with a Gaussian density blob.
//! Training is simulated by a step counter and an exponentially decaying
//! loss. Snapshots are small JSON documents so chains of them can be
//! inspected by hand.

use crate::error::{EngineError, Result};
use crate::testbed::{
    DensityGrid, EngineRenderMode, Projection, RenderSettings, Testbed, TrainingView,
};
use glam::{Affine3A, UVec2, UVec3, Vec2, Vec3};
use image::{Rgba, Rgba32FImage};
use ngp_data::{BoundingBox, TransformManifest};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

const SNAPSHOT_VERSION: u32 = 1;
const DENSITY_PEAK: f32 = 10.0;
const ORTHO_HALF_WIDTH: f32 = 2.0;

/// Call counters, used to observe how the pipeline drives the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub frames: u64,
    pub training_steps: u64,
    pub renders: u64,
    pub screenshots: u64,
    pub density_queries: u64,
    pub snapshots_loaded: u64,
    pub snapshots_saved: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotBlob {
    version: u32,
    network: String,
    step: u32,
    loss: f32,
}

#[derive(Debug, Clone, Copy)]
enum ActiveCamera {
    Pose(Affine3A),
    View(usize),
}

pub struct SyntheticTestbed {
    network: Option<String>,
    step: u32,
    loss: f32,
    training: bool,
    depth_lambda: f32,
    views: Vec<TrainingView>,
    view_poses: Vec<Affine3A>,
    settings: RenderSettings,
    camera: ActiveCamera,
    window: Option<UVec2>,
    accumulated: u32,
    restart_at: Option<u32>,
    stats: EngineStats,
}

impl SyntheticTestbed {
    pub fn new() -> Self {
        Self {
            network: None,
            step: 0,
            loss: initial_loss(),
            training: false,
            depth_lambda: 0.0,
            views: Vec::new(),
            view_poses: Vec::new(),
            settings: RenderSettings::default(),
            camera: ActiveCamera::Pose(Affine3A::from_translation(Vec3::new(0.0, 0.0, 4.0))),
            window: None,
            accumulated: 0,
            restart_at: None,
            stats: EngineStats::default(),
        }
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn depth_supervision_lambda(&self) -> f32 {
        self.depth_lambda
    }

    pub fn render_settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Make the step counter fall back to 0 once `step` is reached, the way
    /// the native engine does when it reinitialises mid-run.
    pub fn schedule_restart(&mut self, step: u32) {
        self.restart_at = Some(step);
    }

    fn camera_pose(&self) -> Affine3A {
        match self.camera {
            ActiveCamera::Pose(pose) => pose,
            ActiveCamera::View(index) => self.view_poses[index],
        }
    }

    /// Focal length and principal point in pixels for an image of `size`.
    fn pinhole(&self, size: UVec2) -> (Vec2, Vec2) {
        let size_f = size.as_vec2();
        if let ActiveCamera::View(index) = self.camera {
            let intr = &self.views[index].intrinsics;
            let scale = size_f / intr.resolution.as_vec2();
            return (intr.focal_length * scale, intr.principal_point * scale);
        }
        let fov = self.settings.fov_degrees.unwrap_or(50.0).to_radians();
        let focal = 0.5 * size_f.x / (0.5 * fov).tan();
        (Vec2::splat(focal), size_f * 0.5)
    }

    fn trace(&self, size: UVec2) -> Rgba32FImage {
        let pose = self.camera_pose();
        let origin = Vec3::from(pose.translation);
        let (focal, principal) = self.pinhole(size);
        let exposure_scale = 2f32.powf(self.settings.exposure);

        Rgba32FImage::from_fn(size.x, size.y, |x, y| {
            let pixel = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
            let (ray_origin, dir) = match self.settings.projection {
                Projection::Perspective => {
                    let d = (pixel - principal) / focal;
                    let dir_cam = Vec3::new(d.x, -d.y, -1.0);
                    (origin, pose.transform_vector3(dir_cam).normalize())
                }
                Projection::Orthographic => {
                    let ndc = (pixel / size.as_vec2()) * 2.0 - Vec2::ONE;
                    let aspect = size.y as f32 / size.x as f32;
                    let offset = Vec3::new(
                        ndc.x * ORTHO_HALF_WIDTH,
                        -ndc.y * ORTHO_HALF_WIDTH * aspect,
                        0.0,
                    );
                    (
                        pose.transform_point3(offset),
                        pose.transform_vector3(Vec3::NEG_Z).normalize(),
                    )
                }
            };

            let hit = intersect_unit_sphere(ray_origin, dir);
            match (self.settings.mode, hit) {
                (EngineRenderMode::Shade, Some(t)) => {
                    let normal = (ray_origin + dir * t).normalize();
                    let c = (normal * 0.5 + Vec3::splat(0.5)) * exposure_scale;
                    Rgba([c.x, c.y, c.z, 1.0])
                }
                (EngineRenderMode::Depth, Some(t)) => {
                    let d = t * exposure_scale;
                    Rgba([d, d, d, 1.0])
                }
                (EngineRenderMode::Confidence, Some(_)) => {
                    let c = (1.0 - self.loss).clamp(0.0, 1.0) * exposure_scale;
                    Rgba([c, c, c, 1.0])
                }
                (EngineRenderMode::Depth, None) => Rgba([0.0, 0.0, 0.0, 1.0]),
                (_, None) => Rgba([0.0, 0.0, 0.0, 0.0]),
            }
        })
    }

    fn require_model(&self, what: &str) -> Result<()> {
        if self.network.is_none() {
            return Err(EngineError::NotInitialized(format!(
                "{what} needs a loaded snapshot or network"
            )));
        }
        Ok(())
    }
}

impl Default for SyntheticTestbed {
    fn default() -> Self {
        Self::new()
    }
}

fn initial_loss() -> f32 {
    loss_at(0, 0.0)
}

fn loss_at(step: u32, depth_lambda: f32) -> f32 {
    0.01 + (0.5 + 0.05 * depth_lambda) * (-(step as f32) / 4000.0).exp()
}

fn intersect_unit_sphere(origin: Vec3, dir: Vec3) -> Option<f32> {
    let b = origin.dot(dir);
    let c = origin.length_squared() - 1.0;
    let disc = b * b - c;
    if disc < 0.0 {
        return None;
    }
    let root = disc.sqrt();
    let near = -b - root;
    let far = -b + root;
    if near > 0.0 {
        Some(near)
    } else if far > 0.0 {
        Some(far)
    } else {
        None
    }
}

fn density_at(p: Vec3) -> f32 {
    DENSITY_PEAK * (-p.length_squared()).exp()
}

impl Testbed for SyntheticTestbed {
    fn load_training_data(&mut self, manifest: &Path) -> Result<()> {
        let transforms = TransformManifest::load(manifest)?;
        let mut views = Vec::with_capacity(transforms.len());
        let mut poses = Vec::with_capacity(transforms.len());
        for (index, frame) in transforms.frames.iter().enumerate() {
            views.push(TrainingView {
                path: frame.file_path.clone(),
                intrinsics: transforms.frame_intrinsics(index)?,
            });
            poses.push(frame.camera_matrix()?);
        }
        info!("Loaded {} training views", views.len());
        self.views = views;
        self.view_poses = poses;
        Ok(())
    }

    fn training_views(&self) -> &[TrainingView] {
        &self.views
    }

    fn load_snapshot(&mut self, path: &Path) -> Result<()> {
        let bytes = fs::read(path).map_err(|source| EngineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let blob: SnapshotBlob =
            serde_json::from_slice(&bytes).map_err(|e| EngineError::Snapshot {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if blob.version != SNAPSHOT_VERSION {
            return Err(EngineError::Snapshot {
                path: path.to_path_buf(),
                reason: format!("unsupported snapshot version {}", blob.version),
            });
        }
        debug!(step = blob.step, "Snapshot loaded");
        self.network = Some(blob.network);
        self.step = blob.step;
        self.loss = blob.loss;
        self.stats.snapshots_loaded += 1;
        Ok(())
    }

    fn save_snapshot(&mut self, path: &Path) -> Result<()> {
        self.require_model("save_snapshot")?;
        let blob = SnapshotBlob {
            version: SNAPSHOT_VERSION,
            network: self.network.clone().unwrap_or_default(),
            step: self.step,
            loss: self.loss,
        };
        let bytes = serde_json::to_vec(&blob).map_err(|e| EngineError::Snapshot {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        fs::write(path, bytes).map_err(|source| EngineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.stats.snapshots_saved += 1;
        Ok(())
    }

    fn reload_network(&mut self, config: &Path) -> Result<()> {
        let text = fs::read_to_string(config).map_err(|source| EngineError::Io {
            path: config.to_path_buf(),
            source,
        })?;
        serde_json::from_str::<serde_json::Value>(&text).map_err(|e| {
            EngineError::InvalidArgument(format!(
                "network config {} is not JSON: {e}",
                config.display()
            ))
        })?;
        let name = config
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("network")
            .to_string();
        self.network = Some(name);
        self.step = 0;
        self.loss = loss_at(0, self.depth_lambda);
        Ok(())
    }

    fn set_training(&mut self, enabled: bool) {
        self.training = enabled;
    }

    fn set_depth_supervision_lambda(&mut self, lambda: f32) {
        self.depth_lambda = lambda;
    }

    fn frame(&mut self) -> Result<bool> {
        self.stats.frames += 1;
        if self.training {
            self.require_model("training")?;
            self.step += 1;
            if self.restart_at.is_some_and(|at| self.step >= at) {
                self.step = 0;
                self.restart_at = None;
            }
            self.loss = loss_at(self.step, self.depth_lambda);
            self.stats.training_steps += 1;
        } else {
            self.accumulated += 1;
        }
        Ok(true)
    }

    fn training_step(&self) -> u32 {
        self.step
    }

    fn loss(&self) -> f32 {
        self.loss
    }

    fn apply_render_settings(&mut self, settings: &RenderSettings) {
        self.settings = *settings;
    }

    fn init_window(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(EngineError::InvalidArgument(format!(
                "window size {width}x{height}"
            )));
        }
        self.window = Some(UVec2::new(width, height));
        Ok(())
    }

    fn set_camera_matrix(&mut self, camera: &Affine3A) {
        self.camera = ActiveCamera::Pose(*camera);
    }

    fn set_camera_to_training_view(&mut self, index: usize) -> Result<()> {
        if index >= self.views.len() {
            return Err(EngineError::ViewOutOfRange {
                index,
                count: self.views.len(),
            });
        }
        self.camera = ActiveCamera::View(index);
        Ok(())
    }

    fn reset_accumulation(&mut self) {
        self.accumulated = 0;
    }

    fn render(&mut self, width: u32, height: u32, spp: u32) -> Result<Rgba32FImage> {
        if width == 0 || height == 0 || spp == 0 {
            return Err(EngineError::InvalidArgument(format!(
                "render {width}x{height} at {spp} spp"
            )));
        }
        self.stats.renders += 1;
        Ok(self.trace(UVec2::new(width, height)))
    }

    fn screenshot(&mut self) -> Result<Rgba32FImage> {
        let size = self.window.ok_or(EngineError::NoWindow)?;
        self.stats.screenshots += 1;
        Ok(self.trace(size))
    }

    fn compute_density_grid(&mut self, resolution: u32, aabb: &BoundingBox) -> Result<DensityGrid> {
        if resolution == 0 {
            return Err(EngineError::InvalidArgument(
                "density resolution must be positive".into(),
            ));
        }
        if !aabb.is_valid() {
            return Err(EngineError::InvalidArgument(format!("empty aabb {aabb:?}")));
        }
        self.stats.density_queries += 1;

        let res = UVec3::splat(resolution);
        let cell = aabb.size() / res.as_vec3();
        let mut values = Vec::with_capacity((resolution as usize).pow(3));
        for z in 0..res.z {
            for y in 0..res.y {
                for x in 0..res.x {
                    let p = aabb.p_min + (UVec3::new(x, y, z).as_vec3() + 0.5) * cell;
                    values.push(density_at(p));
                }
            }
        }
        Ok(DensityGrid {
            resolution: res,
            values,
        })
    }
}
