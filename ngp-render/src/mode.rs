//! Render and camera modes.
//!
//! A mode string is parsed once at stage entry into a closed enum, and the
//! enum resolves to a single [`ModeSettings`] record. Nothing downstream
//! branches on strings.

use crate::error::RenderError;
use ngp_engine::{ColorSpace, EngineRenderMode, Projection, RenderSettings, TonemapCurve};
use std::fmt;
use std::str::FromStr;

/// Exposure bias used for single-channel outputs, in stops.
pub const DATA_EXPOSURE: f32 = -4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    #[default]
    Color,
    Depth,
    Confidence,
}

/// Engine parameters implied by a [`RenderMode`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeSettings {
    pub engine_mode: EngineRenderMode,
    /// Forced samples per pixel; `None` keeps the requested count.
    pub spp_override: Option<u32>,
    pub color_space: ColorSpace,
    pub tonemap_curve: TonemapCurve,
    pub exposure: f32,
}

impl ModeSettings {
    pub fn spp(&self, requested: u32) -> u32 {
        self.spp_override.unwrap_or(requested)
    }

    /// Full engine settings for rendering with this mode.
    pub fn render_settings(&self, fov_degrees: Option<f32>, camera: CameraMode) -> RenderSettings {
        RenderSettings {
            mode: self.engine_mode,
            color_space: self.color_space,
            tonemap_curve: self.tonemap_curve,
            exposure: self.exposure,
            fov_degrees,
            projection: camera.projection(),
            camera_distortion: true,
        }
    }
}

impl RenderMode {
    pub fn settings(self) -> ModeSettings {
        match self {
            RenderMode::Color => ModeSettings {
                engine_mode: EngineRenderMode::Shade,
                spp_override: None,
                color_space: ColorSpace::Srgb,
                tonemap_curve: TonemapCurve::default(),
                exposure: 0.0,
            },
            RenderMode::Depth => ModeSettings {
                engine_mode: EngineRenderMode::Depth,
                spp_override: Some(1),
                color_space: ColorSpace::Linear,
                tonemap_curve: TonemapCurve::Identity,
                exposure: DATA_EXPOSURE,
            },
            RenderMode::Confidence => ModeSettings {
                engine_mode: EngineRenderMode::Confidence,
                spp_override: Some(1),
                color_space: ColorSpace::Linear,
                tonemap_curve: TonemapCurve::Identity,
                exposure: DATA_EXPOSURE,
            },
        }
    }

    /// Whether frames are written as encoded 8-bit images.
    pub fn writes_color(self) -> bool {
        !matches!(self, RenderMode::Depth)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RenderMode::Color => "color",
            RenderMode::Depth => "depth",
            RenderMode::Confidence => "confidence",
        }
    }
}

impl FromStr for RenderMode {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "color" | "image" | "shade" => Ok(RenderMode::Color),
            "depth" => Ok(RenderMode::Depth),
            "confidence" => Ok(RenderMode::Confidence),
            _ => Err(RenderError::InvalidRenderMode(s.to_string())),
        }
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CameraMode {
    #[default]
    Perspective,
    Orthographic,
}

impl CameraMode {
    pub fn projection(self) -> Projection {
        match self {
            CameraMode::Perspective => Projection::Perspective,
            CameraMode::Orthographic => Projection::Orthographic,
        }
    }
}

impl FromStr for CameraMode {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "perspective" => Ok(CameraMode::Perspective),
            "orthographic" => Ok(CameraMode::Orthographic),
            _ => Err(RenderError::InvalidCameraMode(s.to_string())),
        }
    }
}

impl fmt::Display for CameraMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraMode::Perspective => f.write_str("perspective"),
            CameraMode::Orthographic => f.write_str("orthographic"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_render_mode() {
        assert_eq!("color".parse::<RenderMode>().unwrap(), RenderMode::Color);
        assert_eq!("image".parse::<RenderMode>().unwrap(), RenderMode::Color);
        assert_eq!("Depth".parse::<RenderMode>().unwrap(), RenderMode::Depth);
        assert_eq!(
            "confidence".parse::<RenderMode>().unwrap(),
            RenderMode::Confidence
        );
        assert!(matches!(
            "normals".parse::<RenderMode>(),
            Err(RenderError::InvalidRenderMode(m)) if m == "normals"
        ));
    }

    #[test]
    fn test_parse_camera_mode() {
        assert_eq!(
            "orthographic".parse::<CameraMode>().unwrap(),
            CameraMode::Orthographic
        );
        assert!(matches!(
            "fisheye".parse::<CameraMode>(),
            Err(RenderError::InvalidCameraMode(_))
        ));
    }

    #[test]
    fn test_depth_forces_single_sample_linear() {
        let depth = RenderMode::Depth.settings();
        assert_eq!(depth.spp(8), 1);
        assert_eq!(depth.color_space, ColorSpace::Linear);
        assert_eq!(depth.tonemap_curve, TonemapCurve::Identity);
        assert_eq!(depth.exposure, DATA_EXPOSURE);

        let color = RenderMode::Color.settings();
        assert_eq!(color.spp(8), 8);
        assert_eq!(color.exposure, 0.0);
        assert_eq!(RenderMode::Confidence.settings().spp(8), 1);
    }

    #[test]
    fn test_render_settings_projection() {
        let settings = RenderMode::Color
            .settings()
            .render_settings(Some(45.0), CameraMode::Orthographic);
        assert_eq!(settings.projection, Projection::Orthographic);
        assert_eq!(settings.fov_degrees, Some(45.0));
        assert!(settings.camera_distortion);
    }
}
