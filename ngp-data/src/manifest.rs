//! Camera transform manifests.
//!
//! The manifest follows the instant-ngp `transforms.json` layout: global
//! camera parameters at the top level, an ordered `frames` list, and optional
//! per-frame overrides of every intrinsic parameter. Frame order is stable
//! and defines rendering order.

use crate::error::{DataError, Result};
use crate::json::read_json;
use glam::{Affine3A, UVec2, Vec2, Vec3, Vec3A};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Lens model of a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LensMode {
    #[default]
    Perspective,
    OpenCv,
    LatLong,
    HalfLatLong,
}

impl FromStr for LensMode {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PERSPECTIVE" | "PINHOLE" => Ok(LensMode::Perspective),
            "OPENCV" => Ok(LensMode::OpenCv),
            "LATLONG" | "EQUIRECTANGULAR" => Ok(LensMode::LatLong),
            "HALF_LATLONG" | "HALFLATLONG" => Ok(LensMode::HalfLatLong),
            other => Err(DataError::InvalidManifest(format!(
                "unknown camera model '{other}'"
            ))),
        }
    }
}

impl fmt::Display for LensMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LensMode::Perspective => "PERSPECTIVE",
            LensMode::OpenCv => "OPENCV",
            LensMode::LatLong => "LATLONG",
            LensMode::HalfLatLong => "HALF_LATLONG",
        };
        f.write_str(name)
    }
}

/// Intrinsic fields that may appear either globally or on a single frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntrinsicFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fl_x: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fl_y: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cx: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cy: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k1: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k2: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p1: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p2: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_model: Option<String>,
}

impl IntrinsicFields {
    /// Merge two field sets, preferring values from `self`.
    fn or(&self, fallback: &IntrinsicFields) -> IntrinsicFields {
        IntrinsicFields {
            w: self.w.or(fallback.w),
            h: self.h.or(fallback.h),
            fl_x: self.fl_x.or(fallback.fl_x),
            fl_y: self.fl_y.or(fallback.fl_y),
            cx: self.cx.or(fallback.cx),
            cy: self.cy.or(fallback.cy),
            k1: self.k1.or(fallback.k1),
            k2: self.k2.or(fallback.k2),
            p1: self.p1.or(fallback.p1),
            p2: self.p2.or(fallback.p2),
            camera_model: self.camera_model.clone().or_else(|| fallback.camera_model.clone()),
        }
    }

    fn has_distortion(&self) -> bool {
        self.k1.is_some() || self.k2.is_some() || self.p1.is_some() || self.p2.is_some()
    }
}

/// A single posed image in a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub file_path: String,
    /// Camera-to-world pose, row-major, 3 or 4 rows of 4 values.
    pub transform_matrix: Vec<[f32; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sharpness: Option<f32>,
    #[serde(flatten)]
    pub intrinsics: IntrinsicFields,
}

impl Frame {
    pub fn new(file_path: impl Into<String>, transform: Affine3A) -> Self {
        Self {
            file_path: file_path.into(),
            transform_matrix: affine_to_rows(&transform).to_vec(),
            sharpness: None,
            intrinsics: IntrinsicFields::default(),
        }
    }

    /// The pose as an affine camera-to-world transform.
    ///
    /// Only the top 3×4 block of a 4×4 matrix is used.
    pub fn camera_matrix(&self) -> Result<Affine3A> {
        let rows = &self.transform_matrix;
        if rows.len() != 3 && rows.len() != 4 {
            return Err(DataError::InvalidManifest(format!(
                "frame '{}' has a {}-row transform_matrix, expected 3 or 4",
                self.file_path,
                rows.len()
            )));
        }
        let column = |c: usize| Vec3A::new(rows[0][c], rows[1][c], rows[2][c]);
        Ok(Affine3A::from_cols(column(0), column(1), column(2), column(3)))
    }

    /// The final component of `file_path`.
    pub fn file_name(&self) -> &str {
        Path::new(&self.file_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.file_path)
    }
}

/// Convert an affine transform into the 3×4 row-major layout used on disk.
pub fn affine_to_rows(transform: &Affine3A) -> [[f32; 4]; 3] {
    let m = transform.matrix3;
    let t = transform.translation;
    [
        [m.x_axis.x, m.y_axis.x, m.z_axis.x, t.x],
        [m.x_axis.y, m.y_axis.y, m.z_axis.y, t.y],
        [m.x_axis.z, m.y_axis.z, m.z_axis.z, t.z],
    ]
}

/// Fully resolved intrinsics for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    pub resolution: UVec2,
    /// Focal length in pixels.
    pub focal_length: Vec2,
    /// Principal point in pixels.
    pub principal_point: Vec2,
    pub lens: LensMode,
    /// OpenCV coefficients `(k1, k2, p1, p2)`; zero for other lens modes.
    pub distortion: [f32; 4],
}

impl CameraIntrinsics {
    /// Principal point divided by the resolution.
    pub fn principal_point_normalized(&self) -> Vec2 {
        self.principal_point / self.resolution.as_vec2()
    }
}

/// An ordered set of camera frames plus their shared parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformManifest {
    /// Horizontal field of view in radians.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_angle_x: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_angle_y: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aabb_scale: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<Vec3>,
    #[serde(flatten)]
    pub intrinsics: IntrinsicFields,
    #[serde(default)]
    pub frames: Vec<Frame>,
}

impl TransformManifest {
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self> {
        let manifest: TransformManifest = read_json(path)?;
        tracing::debug!("Loaded manifest with {} frames", manifest.frames.len());
        Ok(manifest)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Horizontal field of view in degrees, if the manifest defines one.
    pub fn fov_degrees(&self) -> Option<f32> {
        self.camera_angle_x.map(f32::to_degrees)
    }

    /// Resolution of a frame, from the frame itself or the global fields.
    pub fn frame_resolution(&self, index: usize) -> Option<UVec2> {
        let frame = self.frames.get(index)?;
        let w = frame.intrinsics.w.or(self.intrinsics.w)?;
        let h = frame.intrinsics.h.or(self.intrinsics.h)?;
        Some(UVec2::new(w.round() as u32, h.round() as u32))
    }

    /// Resolve the intrinsics of a frame, applying global fallbacks.
    pub fn frame_intrinsics(&self, index: usize) -> Result<CameraIntrinsics> {
        let frame = self.frames.get(index).ok_or_else(|| {
            DataError::InvalidManifest(format!(
                "frame index {index} out of range ({} frames)",
                self.frames.len()
            ))
        })?;
        let fields = frame.intrinsics.or(&self.intrinsics);
        let missing = |what: &str| {
            DataError::InvalidManifest(format!("frame '{}' has no {what}", frame.file_path))
        };

        let w = fields.w.ok_or_else(|| missing("width"))?;
        let h = fields.h.ok_or_else(|| missing("height"))?;

        let fl_x = fields
            .fl_x
            .or_else(|| self.camera_angle_x.map(|a| 0.5 * w / (0.5 * a).tan()))
            .ok_or_else(|| missing("horizontal focal length"))?;
        let fl_y = fields
            .fl_y
            .or_else(|| self.camera_angle_y.map(|a| 0.5 * h / (0.5 * a).tan()))
            .unwrap_or(fl_x);

        let cx = fields.cx.unwrap_or(0.5 * w);
        let cy = fields.cy.unwrap_or(0.5 * h);

        let lens = match &fields.camera_model {
            Some(model) => model.parse()?,
            None if fields.has_distortion() => LensMode::OpenCv,
            None => LensMode::Perspective,
        };
        let distortion = if lens == LensMode::OpenCv {
            [
                fields.k1.unwrap_or(0.0),
                fields.k2.unwrap_or(0.0),
                fields.p1.unwrap_or(0.0),
                fields.p2.unwrap_or(0.0),
            ]
        } else {
            [0.0; 4]
        };

        Ok(CameraIntrinsics {
            resolution: UVec2::new(w.round() as u32, h.round() as u32),
            focal_length: Vec2::new(fl_x, fl_y),
            principal_point: Vec2::new(cx, cy),
            lens,
            distortion,
        })
    }
}
