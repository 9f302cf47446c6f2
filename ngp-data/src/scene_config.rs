//! Engine scene configuration (`nerf_config.json`).

use crate::bbox::BoundingBox;
use crate::error::Result;
use crate::json::read_json;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Scene scale and render bounding box, both in engine coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SceneConfig {
    pub scale: f32,
    #[serde(rename = "ngp_render_aabb")]
    pub render_aabb: BoundingBox,
}

impl SceneConfig {
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_parse_scene_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nerf_config.json");
        std::fs::write(
            &path,
            r#"{"scale": 0.5, "ngp_render_aabb": {"p_min": [0, 0, 0], "p_max": [8, 4, 2]}}"#,
        )
        .unwrap();

        let config = SceneConfig::load(&path).unwrap();
        assert_eq!(config.scale, 0.5);
        assert_eq!(config.render_aabb.p_max, Vec3::new(8.0, 4.0, 2.0));
    }
}
