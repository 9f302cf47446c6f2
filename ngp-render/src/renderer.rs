//! Camera-driven rendering of a transform manifest.
//!
//! Frames are rendered in manifest order. The camera is either driven
//! directly by each frame's pose, or by the engine's own copy of the frame
//! loaded as a training view, which carries the exact per-frame intrinsics
//! and lens distortion.

use crate::error::{RenderError, Result};
use crate::mode::{CameraMode, ModeSettings, RenderMode};
use crate::progress::progress_bar;
use crate::tonemap::{encode_color, normalize_png_name, save_image, tonemap_depth};
use glam::UVec2;
use image::Rgba32FImage;
use ngp_data::npy::write_npy;
use ngp_data::TransformManifest;
use ngp_engine::{Testbed, TrainingView};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Pixel budget for rendering; larger requests are halved until they fit.
pub const MAX_RENDER_PIXELS: u32 = 1920 * 1080 * 4;

const FOCAL_EPS: f32 = 1e-4;
const PRINCIPAL_EPS: f32 = 1e-5;
const LENS_EPS: f32 = 1e-6;

/// Halve both dimensions until the pixel count fits [`MAX_RENDER_PIXELS`].
pub fn display_resolution(width: u32, height: u32) -> UVec2 {
    let (mut w, mut h) = (width, height);
    while u64::from(w) * u64::from(h) > u64::from(MAX_RENDER_PIXELS) {
        w /= 2;
        h /= 2;
    }
    UVec2::new(w, h)
}

/// How the active camera is set for each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CameraSource {
    /// Pose matrix from the manifest, intrinsics from its field of view.
    #[default]
    Pose,
    /// The manifest is loaded as training data and each frame selected as a
    /// training view, reproducing its intrinsics exactly.
    TrainingView,
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub snapshot: PathBuf,
    pub transforms: PathBuf,
    pub output_dir: PathBuf,
    pub mode: RenderMode,
    pub camera_mode: CameraMode,
    pub camera_source: CameraSource,
    pub spp: u32,
    /// Render at most this many frames.
    pub max_frames: Option<usize>,
    /// Accumulate in an on-screen window and read back screenshots.
    pub display: bool,
    /// Also write a tone-mapped `.png` next to every depth `.npy`.
    pub color_depth: bool,
    /// Fallback resolution when the manifest carries none.
    pub width: u32,
    pub height: u32,
    pub show_progress: bool,
}

impl RenderOptions {
    pub fn new(
        snapshot: impl Into<PathBuf>,
        transforms: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            snapshot: snapshot.into(),
            transforms: transforms.into(),
            output_dir: output_dir.into(),
            mode: RenderMode::Color,
            camera_mode: CameraMode::Perspective,
            camera_source: CameraSource::Pose,
            spp: 4,
            max_frames: None,
            display: false,
            color_depth: false,
            width: 1920,
            height: 1080,
            show_progress: false,
        }
    }

    pub fn with_mode(mut self, mode: RenderMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_camera_mode(mut self, camera_mode: CameraMode) -> Self {
        self.camera_mode = camera_mode;
        self
    }

    pub fn with_camera_source(mut self, source: CameraSource) -> Self {
        self.camera_source = source;
        self
    }

    pub fn with_spp(mut self, spp: u32) -> Self {
        self.spp = spp;
        self
    }

    pub fn with_max_frames(mut self, max_frames: Option<usize>) -> Self {
        self.max_frames = max_frames;
        self
    }

    pub fn with_display(mut self, display: bool) -> Self {
        self.display = display;
        self
    }

    pub fn with_color_depth(mut self, color_depth: bool) -> Self {
        self.color_depth = color_depth;
        self
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_progress(mut self, visible: bool) -> Self {
        self.show_progress = visible;
        self
    }
}

#[derive(Debug, Clone)]
pub struct RenderSummary {
    pub output_dir: PathBuf,
    pub frames_written: usize,
    /// Every file written, previews included.
    pub files: Vec<PathBuf>,
}

/// A frame to render: where the camera comes from and what it is called.
struct FrameJob {
    index: usize,
    name: String,
    resolution: UVec2,
}

pub struct CameraRenderer {
    options: RenderOptions,
    settings: ModeSettings,
}

impl CameraRenderer {
    pub fn new(options: RenderOptions) -> Self {
        let settings = options.mode.settings();
        Self { options, settings }
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    #[tracing::instrument(skip_all, fields(mode = %self.options.mode, out = %self.options.output_dir.display()))]
    pub fn render(&self, engine: &mut dyn Testbed) -> Result<RenderSummary> {
        let opts = &self.options;
        if !opts.transforms.is_file() {
            return Err(RenderError::MissingFile(opts.transforms.clone()));
        }
        if !opts.snapshot.is_file() {
            return Err(RenderError::MissingFile(opts.snapshot.clone()));
        }
        if opts.spp == 0 {
            return Err(RenderError::InvalidInput("spp must be positive".into()));
        }

        info!("Loading snapshot {}", opts.snapshot.display());
        engine.load_snapshot(&opts.snapshot)?;
        engine.set_training(false);

        debug!("Render transforms from {}", opts.transforms.display());
        let manifest = TransformManifest::load(&opts.transforms)?;

        let fallback = display_resolution(opts.width, opts.height);
        if opts.display {
            debug!("Use onscreen rendering");
            engine.init_window(fallback.x, fallback.y)?;
        } else {
            debug!("Use offscreen rendering");
        }

        engine.apply_render_settings(
            &self
                .settings
                .render_settings(manifest.fov_degrees(), opts.camera_mode),
        );

        let jobs = match opts.camera_source {
            CameraSource::Pose => self.pose_jobs(&manifest, fallback),
            CameraSource::TrainingView => self.training_view_jobs(engine, &manifest)?,
        };

        fs::create_dir_all(&opts.output_dir).map_err(|source| RenderError::Io {
            path: opts.output_dir.clone(),
            source,
        })?;

        let spp = self.settings.spp(opts.spp);
        let progress = progress_bar(jobs.len() as u64, opts.show_progress, "Rendering", "frames");
        let mut files = Vec::with_capacity(jobs.len());

        for job in &jobs {
            match opts.camera_source {
                CameraSource::Pose => {
                    let pose = manifest.frames[job.index].camera_matrix()?;
                    engine.set_camera_matrix(&pose);
                }
                CameraSource::TrainingView => engine.set_camera_to_training_view(job.index)?,
            }

            let image = self.capture(engine, job.resolution, spp)?;
            self.write_frame(&image, &job.name, &mut files)?;
            progress.inc(1);
        }
        progress.finish_and_clear();

        info!(
            "Rendered {} {} frames into {}",
            jobs.len(),
            opts.mode,
            opts.output_dir.display()
        );
        Ok(RenderSummary {
            output_dir: opts.output_dir.clone(),
            frames_written: jobs.len(),
            files,
        })
    }

    fn frame_count(&self, available: usize) -> usize {
        match self.options.max_frames {
            Some(cap) => cap.min(available),
            None => available,
        }
    }

    fn pose_jobs(&self, manifest: &TransformManifest, fallback: UVec2) -> Vec<FrameJob> {
        (0..self.frame_count(manifest.len()))
            .map(|index| FrameJob {
                index,
                name: manifest.frames[index].file_name().to_string(),
                resolution: manifest
                    .frame_resolution(index)
                    .map(|r| display_resolution(r.x, r.y))
                    .unwrap_or(fallback),
            })
            .collect()
    }

    fn training_view_jobs(
        &self,
        engine: &mut dyn Testbed,
        manifest: &TransformManifest,
    ) -> Result<Vec<FrameJob>> {
        engine.load_training_data(&self.options.transforms)?;
        let views = engine.training_views();
        if views.len() != manifest.len() {
            return Err(RenderError::FrameCountMismatch {
                manifest: manifest.len(),
                engine: views.len(),
            });
        }
        Ok(views
            .iter()
            .take(self.frame_count(views.len()))
            .enumerate()
            .map(|(index, view)| FrameJob {
                index,
                name: file_name(&view.path),
                resolution: view.intrinsics.resolution,
            })
            .collect())
    }

    fn capture(&self, engine: &mut dyn Testbed, resolution: UVec2, spp: u32) -> Result<Rgba32FImage> {
        let mut image = if self.options.display {
            engine.reset_accumulation();
            for _ in 0..spp {
                engine.frame()?;
            }
            engine.screenshot()?
        } else {
            engine.render(resolution.x, resolution.y, spp)?
        };

        // Undo the exposure bias so depth comes back in scene units.
        let compensation = 2f32.powf(-self.settings.exposure);
        if compensation != 1.0 {
            for pixel in image.pixels_mut() {
                for c in 0..3 {
                    pixel[c] *= compensation;
                }
            }
        }
        Ok(image)
    }

    fn write_frame(&self, image: &Rgba32FImage, name: &str, files: &mut Vec<PathBuf>) -> Result<()> {
        let base = self.options.output_dir.join(name);
        if self.options.mode.writes_color() {
            let out = normalize_png_name(&base);
            save_image(&encode_color(image), &out)?;
            files.push(out);
            return Ok(());
        }

        let (w, h) = image.dimensions();
        let depth: Vec<f32> = image.pixels().map(|p| p[0]).collect();
        let out = base.with_extension("npy");
        write_npy(&out, &[h as usize, w as usize], &depth)?;
        files.push(out);

        if self.options.color_depth {
            let preview = base.with_extension("png");
            save_image(&tonemap_depth(&depth, w, h), &preview)?;
            files.push(preview);
        }
        Ok(())
    }
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
        .to_string()
}

/// Check that every engine training view reproduces the intrinsics of the
/// manifest frame it was loaded from, matched by file path.
pub fn verify_training_view_intrinsics(
    manifest: &TransformManifest,
    views: &[TrainingView],
) -> Result<()> {
    if views.len() != manifest.len() {
        return Err(RenderError::FrameCountMismatch {
            manifest: manifest.len(),
            engine: views.len(),
        });
    }

    let by_path: HashMap<&str, usize> = manifest
        .frames
        .iter()
        .enumerate()
        .map(|(i, f)| (f.file_path.as_str(), i))
        .collect();

    for view in views {
        let mismatch = |detail: String| RenderError::IntrinsicsMismatch {
            path: view.path.clone(),
            detail,
        };
        let index = *by_path
            .get(view.path.as_str())
            .ok_or_else(|| mismatch("no manifest frame with this path".into()))?;
        let expected = manifest.frame_intrinsics(index)?;
        let actual = &view.intrinsics;

        if actual.resolution != expected.resolution {
            return Err(mismatch(format!(
                "resolution {} != {}",
                actual.resolution, expected.resolution
            )));
        }
        if !actual.focal_length.abs_diff_eq(expected.focal_length, FOCAL_EPS) {
            return Err(mismatch(format!(
                "focal length {} != {}",
                actual.focal_length, expected.focal_length
            )));
        }
        if !actual
            .principal_point_normalized()
            .abs_diff_eq(expected.principal_point_normalized(), PRINCIPAL_EPS)
        {
            return Err(mismatch(format!(
                "principal point {} != {}",
                actual.principal_point_normalized(),
                expected.principal_point_normalized()
            )));
        }
        if view.lens_mode() != expected.lens {
            return Err(mismatch(format!(
                "lens mode {} != {}",
                view.lens_mode(),
                expected.lens
            )));
        }
        let [k1, k2, p1, p2] = expected.distortion;
        let expected_params = [k1, k2, p1, p2, 0.0, 0.0, 0.0];
        let params = view.lens_params();
        if params
            .iter()
            .zip(expected_params)
            .any(|(a, b)| (a - b).abs() > LENS_EPS)
        {
            return Err(mismatch(format!(
                "lens params {params:?} != {expected_params:?}"
            )));
        }
    }
    debug!("Verified intrinsics of {} training views", views.len());
    Ok(())
}
