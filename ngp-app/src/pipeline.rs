//! The full per-scene pipeline.
//!
//! Stages run strictly in order: train, render color, render topview, render
//! depth and tone-map it, extract density, assemble videos, write
//! `info.json`, upload. Every stage except training can be skipped. The
//! profiling trace is written even when a stage fails.

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::scene::{RenderStage, RunInfo, SceneComputer};
use crate::video;
use ngp_data::RunContext;
use ngp_engine::Testbed;
use ngp_render::tonemap::tonemap_folder;
use tracing::{info, warn};

/// Name of the profiling trace written into the data directory.
pub const PROFILING_FILE: &str = "profiling.json";

#[tracing::instrument(skip_all, fields(scene = %config.scene, config = %config.config))]
pub fn run_pipeline(
    engine: &mut dyn Testbed,
    config: &PipelineConfig,
    ctx: &RunContext,
) -> Result<RunInfo> {
    let result = {
        let _scope = ctx.scope("compute_scene");
        run_stages(engine, config, ctx)
    };

    let trace = config.data_dir.join(PROFILING_FILE);
    if let Err(e) = ctx.export_chrome_trace(&trace) {
        warn!("Could not write profiling trace: {}", e);
    }
    result
}

fn run_stages(engine: &mut dyn Testbed, config: &PipelineConfig, ctx: &RunContext) -> Result<RunInfo> {
    info!("Run NeRF scene {}", config.scene);
    let mut computer = SceneComputer::prepare(config)?;

    info!("Train");
    computer.train(engine, ctx)?;

    let target = if config.display { "GPU" } else { "CPU" };
    let color = if config.skip_color {
        None
    } else {
        info!("Render color on {}", target);
        Some(computer.render(engine, ctx, RenderStage::Color)?)
    };

    if !config.skip_topview {
        info!("Render color topview on {}", target);
        computer.render(engine, ctx, RenderStage::Topview)?;
    }

    let depth_png = if config.skip_depth {
        None
    } else {
        info!("Render depth on {}", target);
        let depth = computer.render(engine, ctx, RenderStage::Depth)?;
        let _scope = ctx.scope("tonemap_depth");
        let depth_png = computer.paths().depth_png_dir();
        tonemap_folder(&depth, &depth_png)?;
        Some(depth_png)
    };

    if !config.skip_density {
        info!("Extract density");
        computer.extract_density(engine, ctx)?;
    }

    if !config.skip_video {
        let _scope = ctx.scope("videos");
        let paths = computer.paths();
        let ffmpeg = &config.tools.ffmpeg;
        if let Some(color) = &color {
            video::folder_to_video(ffmpeg, color, &paths.color_video(), config.video_fps)?;
        }
        if let Some(depth_png) = &depth_png {
            video::folder_to_video(ffmpeg, depth_png, &paths.depth_video(), config.video_fps)?;
        }
        if color.is_some() && depth_png.is_some() {
            let (color_video, depth_video) = (paths.color_video(), paths.depth_video());
            video::merge_videos(
                ffmpeg,
                &[color_video.as_path(), depth_video.as_path()],
                &paths.result_video(),
            )?;
        }
    }

    let info_path = computer.save_info()?;
    info!("Saved run info to {}", info_path.display());

    if config.upload {
        computer.upload()?;
    }
    Ok(computer.info().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExternalTools;
    use crate::error::PipelineError;
    use ngp_data::Frame;
    use ngp_engine::SyntheticTestbed;
    use glam::{Affine3A, Vec3};
    use serde_json::json;
    use std::fs;
    use std::path::Path;

    fn write_manifest(path: &Path, z: f32) {
        let frames: Vec<Frame> = (0..3)
            .map(|i| {
                let pose = Affine3A::from_translation(Vec3::new(0.2 * i as f32, 0.0, z));
                Frame::new(format!("./images/frame_{i:04}"), pose)
            })
            .collect();
        let manifest = json!({"camera_angle_x": 0.8, "w": 16, "h": 12, "frames": frames});
        fs::write(path, manifest.to_string()).unwrap();
    }

    fn scene(root: &Path, with_density: bool) -> PipelineConfig {
        let scene_dir = root.join("data/lego");
        fs::create_dir_all(&scene_dir).unwrap();
        write_manifest(&scene_dir.join("training.json"), 3.0);
        write_manifest(&scene_dir.join("test.json"), 3.0);
        write_manifest(&scene_dir.join("topview.json"), 4.0);
        if with_density {
            let scene_config = json!({
                "scale": 1.0,
                "ngp_render_aabb": {"p_min": [-4.0, 0.0, 0.0], "p_max": [4.0, 4.0, 4.0]},
            });
            fs::write(scene_dir.join("nerf_config.json"), scene_config.to_string()).unwrap();
        }

        let config_dir = root.join("configs");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join("base.json"), r#"{"network": {}}"#).unwrap();

        let mut config = PipelineConfig::new("lego", "base")
            .with_data_dir(root.join("data"))
            .with_config_dir(config_dir)
            .with_steps(10, 30)
            .with_density(1, 4.0)
            .with_progress(false);
        config.skip_video = true;
        config
    }

    #[test]
    fn test_full_pipeline_without_video() {
        let dir = tempfile::tempdir().unwrap();
        let config = scene(dir.path(), true);
        let ctx = RunContext::new();
        let mut engine = SyntheticTestbed::new();

        let info = run_pipeline(&mut engine, &config, &ctx).unwrap();
        let paths = config.paths();

        assert!(paths.snapshot_dir().join("snap_30.msgpack").is_file());
        assert_eq!(fs::read_dir(paths.color_dir()).unwrap().count(), 3);
        assert_eq!(fs::read_dir(paths.topview_dir()).unwrap().count(), 3);
        assert!(paths.depth_dir().join("frame_0002.npy").is_file());
        assert!(paths.depth_png_dir().join("frame_0002.png").is_file());
        assert!(paths.density_dir().join("density_1.npy").is_file());
        assert!(!paths.density_dir().join("density_2.npy").exists());

        assert_eq!(info.n_step, Some(10));
        assert_eq!(info.max_step, Some(30));
        assert!(info.render_color_time.is_some());
        assert!(info.density_time.is_some());

        let written: RunInfo =
            serde_json::from_str(&fs::read_to_string(paths.info()).unwrap()).unwrap();
        assert_eq!(written, info);
        assert!(config.data_dir.join(PROFILING_FILE).is_file());
    }

    #[test]
    fn test_rerun_skips_training() {
        let dir = tempfile::tempdir().unwrap();
        let config = scene(dir.path(), false);
        run_pipeline(&mut SyntheticTestbed::new(), &config, &RunContext::new()).unwrap();

        let mut engine = SyntheticTestbed::new();
        run_pipeline(&mut engine, &config, &RunContext::new()).unwrap();
        assert_eq!(engine.stats().training_steps, 0);
    }

    #[test]
    fn test_skip_flags_leave_other_timings() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = scene(dir.path(), false);
        config.skip_color = true;
        config.skip_topview = true;

        let info = run_pipeline(&mut SyntheticTestbed::new(), &config, &RunContext::new()).unwrap();
        assert!(info.render_color_time.is_none());
        assert!(info.render_topview_time.is_none());
        assert!(info.render_depth_time.is_some());
        assert!(info.training_time.is_some());
        // No scene configuration, so no density stage.
        assert!(info.density_time.is_none());
        assert!(!config.paths().color_dir().exists());
    }

    #[test]
    fn test_failed_stage_still_profiled() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = scene(dir.path(), false);
        config.skip_video = false;
        config.tools = ExternalTools {
            ffmpeg: "ngp-no-such-ffmpeg".to_string(),
            ..ExternalTools::default()
        };
        let ctx = RunContext::new();

        let err = run_pipeline(&mut SyntheticTestbed::new(), &config, &ctx).unwrap_err();
        assert!(matches!(err, PipelineError::ExternalCommand { .. }));

        let trace: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(config.data_dir.join(PROFILING_FILE)).unwrap(),
        )
        .unwrap();
        let names: Vec<&str> = trace["traceEvents"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|e| e["name"].as_str())
            .collect();
        assert!(names.contains(&"videos"));
        assert!(names.contains(&"compute_scene"));
    }

    #[test]
    fn test_missing_scene_without_remote() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::new("nowhere", "base")
            .with_data_dir(dir.path())
            .with_progress(false);
        let err = run_pipeline(&mut SyntheticTestbed::new(), &config, &RunContext::new())
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingScene(_)));
    }
}
