//! Per-scene stages and the run info they accumulate.

use crate::config::{PipelineConfig, ScenePaths};
use crate::error::{PipelineError, Result};
use crate::sync;
use ngp_data::RunContext;
use ngp_data::json::write_json;
use ngp_engine::Testbed;
use ngp_render::{
    CameraMode, CameraRenderer, DensityOptions, RenderMode, RenderOptions, extract_density,
};
use ngp_train::{IncrementalTrainer, TrainerConfig, TrainingReport};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::info;

/// Contents of `info.json`. Times are wall-clock seconds; stages that did
/// not run are left out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_step: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_step: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_color_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_topview_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_depth_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub density_time: Option<f64>,
}

/// The renders produced for a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStage {
    Color,
    Topview,
    Depth,
}

impl RenderStage {
    fn name(self) -> &'static str {
        match self {
            RenderStage::Color => "render_color",
            RenderStage::Topview => "render_topview",
            RenderStage::Depth => "render_depth",
        }
    }
}

/// Runs the stages of one scene and records their timings.
pub struct SceneComputer<'a> {
    config: &'a PipelineConfig,
    paths: ScenePaths,
    info: RunInfo,
}

impl<'a> SceneComputer<'a> {
    /// Make sure the scene is available locally and the result dir exists.
    pub fn prepare(config: &'a PipelineConfig) -> Result<Self> {
        let paths = config.paths();
        if !paths.scene_dir.is_dir() {
            let url = config
                .remote_url()
                .ok_or_else(|| PipelineError::MissingScene(paths.scene_dir.clone()))?;
            sync::download(&config.tools.aws, &url, &paths.scene_dir)?;
        }
        fs::create_dir_all(&paths.result_dir).map_err(|source| PipelineError::Io {
            path: paths.result_dir.clone(),
            source,
        })?;
        Ok(Self {
            config,
            paths,
            info: RunInfo::default(),
        })
    }

    pub fn paths(&self) -> &ScenePaths {
        &self.paths
    }

    pub fn info(&self) -> &RunInfo {
        &self.info
    }

    pub fn final_snapshot(&self) -> PathBuf {
        ngp_train::SnapshotStore::new(self.paths.snapshot_dir()).path(self.config.final_step())
    }

    pub fn train(&mut self, engine: &mut dyn Testbed, ctx: &RunContext) -> Result<TrainingReport> {
        let scope = ctx.scope("train");
        let trainer = IncrementalTrainer::new(
            TrainerConfig::new(self.paths.snapshot_dir())
                .with_manifest(self.paths.training_manifest())
                .with_network(self.config.network_config())
                .with_steps(self.config.chunk_size, self.config.max_step)
                .with_depth_supervision(self.config.depth_supervision)
                .with_training_info(self.paths.training_info())
                .with_progress(self.config.show_progress),
        );
        let report = trainer.run(engine)?;

        self.info.n_step = Some(self.config.chunk_size);
        self.info.max_step = Some(self.config.max_step);
        self.info.training_time = Some(scope.elapsed().as_secs_f64());
        Ok(report)
    }

    /// Render one stage; returns the directory holding its frames.
    pub fn render(
        &mut self,
        engine: &mut dyn Testbed,
        ctx: &RunContext,
        stage: RenderStage,
    ) -> Result<PathBuf> {
        let scope = ctx.scope(stage.name());
        let (transforms, output_dir, mode, camera) = match stage {
            RenderStage::Color => (
                self.paths.test_manifest(),
                self.paths.color_dir(),
                RenderMode::Color,
                CameraMode::Perspective,
            ),
            RenderStage::Topview => (
                self.paths.topview_manifest(),
                self.paths.topview_dir(),
                RenderMode::Color,
                CameraMode::Orthographic,
            ),
            RenderStage::Depth => (
                self.paths.test_manifest(),
                self.paths.depth_dir(),
                RenderMode::Depth,
                CameraMode::Perspective,
            ),
        };

        let options = RenderOptions::new(self.final_snapshot(), transforms, &output_dir)
            .with_mode(mode)
            .with_camera_mode(camera)
            .with_display(self.config.display)
            .with_max_frames(self.config.max_frames)
            .with_progress(self.config.show_progress);
        CameraRenderer::new(options).render(engine)?;

        let elapsed = Some(scope.elapsed().as_secs_f64());
        match stage {
            RenderStage::Color => self.info.render_color_time = elapsed,
            RenderStage::Topview => self.info.render_topview_time = elapsed,
            RenderStage::Depth => self.info.render_depth_time = elapsed,
        }
        Ok(output_dir)
    }

    /// Extract density when the scene has an engine scene configuration.
    pub fn extract_density(
        &mut self,
        engine: &mut dyn Testbed,
        ctx: &RunContext,
    ) -> Result<Option<PathBuf>> {
        let scene_config = self.paths.scene_config();
        if !scene_config.is_file() {
            info!(
                "No {} for this scene, skipping density",
                scene_config.display()
            );
            return Ok(None);
        }

        let scope = ctx.scope("extract_density");
        let output_dir = self.paths.density_dir();
        let options = DensityOptions::new(self.final_snapshot(), scene_config, &output_dir)
            .with_resolution(self.config.density_resolution)
            .with_cube_size(self.config.density_cube_size)
            .with_progress(self.config.show_progress);
        extract_density(engine, &options)?;

        self.info.density_time = Some(scope.elapsed().as_secs_f64());
        Ok(Some(output_dir))
    }

    pub fn save_info(&self) -> Result<PathBuf> {
        let path = self.paths.info();
        write_json(&path, &self.info, true)?;
        Ok(path)
    }

    pub fn upload(&self) -> Result<()> {
        match self.config.remote_url() {
            Some(url) => sync::upload(&self.config.tools.aws, &self.paths.scene_dir, &url),
            None => {
                tracing::warn!("Upload requested but no remote is configured");
                Ok(())
            }
        }
    }
}
