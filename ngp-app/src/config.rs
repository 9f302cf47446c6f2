//! Paths and settings of a pipeline run.

use ngp_train::trainer::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_STEP};
use std::env;
use std::path::{Path, PathBuf};

/// Overrides the data directory.
pub const DATA_DIR_ENV: &str = "NGP_DATA_DIR";
/// Set inside batch jobs, where data lives under `$HOME`.
pub const BATCH_JOB_ENV: &str = "AWS_BATCH_JOB_ID";

pub const DEFAULT_CONFIG_DIR: &str = "configs/nerf";
pub const DEFAULT_VIDEO_FPS: u32 = 2;

/// Root directory holding one sub-directory per scene.
pub fn default_data_dir() -> PathBuf {
    if let Some(dir) = env::var_os(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    if let Some(home) = env::var_os(BATCH_JOB_ENV).and_then(|_| env::var_os("HOME")) {
        return PathBuf::from(home).join("data");
    }
    PathBuf::from("data")
}

/// `<config_dir>/<name>.json`
pub fn network_config_path(config_dir: &Path, name: &str) -> PathBuf {
    config_dir.join(format!("{name}.json"))
}

/// Every input and output location of one scene and network config.
#[derive(Debug, Clone)]
pub struct ScenePaths {
    pub scene_dir: PathBuf,
    pub result_dir: PathBuf,
}

impl ScenePaths {
    pub fn new(data_dir: &Path, scene: &str, config: &str) -> Self {
        let scene_dir = data_dir.join(scene);
        let result_dir = scene_dir.join(config);
        Self {
            scene_dir,
            result_dir,
        }
    }

    pub fn training_manifest(&self) -> PathBuf {
        self.scene_dir.join("training.json")
    }

    pub fn test_manifest(&self) -> PathBuf {
        self.scene_dir.join("test.json")
    }

    pub fn topview_manifest(&self) -> PathBuf {
        self.scene_dir.join("topview.json")
    }

    /// Engine scene configuration; density is only extracted when present.
    pub fn scene_config(&self) -> PathBuf {
        self.scene_dir.join("nerf_config.json")
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.result_dir.join("snapshot")
    }

    pub fn training_info(&self) -> PathBuf {
        self.result_dir.join("training_info.json")
    }

    pub fn color_dir(&self) -> PathBuf {
        self.result_dir.join("color")
    }

    pub fn topview_dir(&self) -> PathBuf {
        self.result_dir.join("topview")
    }

    pub fn depth_dir(&self) -> PathBuf {
        self.result_dir.join("depth")
    }

    pub fn depth_png_dir(&self) -> PathBuf {
        self.result_dir.join("depth_png")
    }

    pub fn density_dir(&self) -> PathBuf {
        self.result_dir.join("density")
    }

    pub fn info(&self) -> PathBuf {
        self.result_dir.join("info.json")
    }

    pub fn color_video(&self) -> PathBuf {
        self.result_dir.join("video.mp4")
    }

    pub fn depth_video(&self) -> PathBuf {
        self.result_dir.join("depth.mp4")
    }

    pub fn result_video(&self) -> PathBuf {
        self.result_dir.join("result.mp4")
    }
}

/// Names of the external programs the pipeline shells out to.
#[derive(Debug, Clone)]
pub struct ExternalTools {
    pub ffmpeg: String,
    pub aws: String,
}

impl Default for ExternalTools {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            aws: "aws".to_string(),
        }
    }
}

/// Settings of a full `compute-scene` run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub scene: String,
    /// Network config name, resolved inside `config_dir`.
    pub config: String,
    pub data_dir: PathBuf,
    pub config_dir: PathBuf,
    /// Remote root such as `s3://bucket/nerf`; scenes live at `<root>/<scene>/`.
    pub remote: Option<String>,
    pub chunk_size: u32,
    pub max_step: u32,
    pub depth_supervision: bool,
    pub display: bool,
    pub max_frames: Option<usize>,
    pub density_resolution: u32,
    pub density_cube_size: f32,
    pub video_fps: u32,
    pub skip_color: bool,
    pub skip_topview: bool,
    pub skip_depth: bool,
    pub skip_density: bool,
    pub skip_video: bool,
    pub upload: bool,
    pub tools: ExternalTools,
    pub show_progress: bool,
}

impl PipelineConfig {
    pub fn new(scene: impl Into<String>, config: impl Into<String>) -> Self {
        Self {
            scene: scene.into(),
            config: config.into(),
            data_dir: default_data_dir(),
            config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            remote: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_step: DEFAULT_MAX_STEP,
            depth_supervision: false,
            display: false,
            max_frames: None,
            density_resolution: 256,
            density_cube_size: 4.0,
            video_fps: DEFAULT_VIDEO_FPS,
            skip_color: false,
            skip_topview: false,
            skip_depth: false,
            skip_density: false,
            skip_video: false,
            upload: false,
            tools: ExternalTools::default(),
            show_progress: true,
        }
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn with_config_dir(mut self, config_dir: impl Into<PathBuf>) -> Self {
        self.config_dir = config_dir.into();
        self
    }

    pub fn with_remote(mut self, remote: Option<String>) -> Self {
        self.remote = remote;
        self
    }

    pub fn with_steps(mut self, chunk_size: u32, max_step: u32) -> Self {
        self.chunk_size = chunk_size;
        self.max_step = max_step;
        self
    }

    pub fn with_density(mut self, voxels_per_meter: u32, cube_size: f32) -> Self {
        self.density_resolution = voxels_per_meter;
        self.density_cube_size = cube_size;
        self
    }

    pub fn with_tools(mut self, tools: ExternalTools) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_progress(mut self, visible: bool) -> Self {
        self.show_progress = visible;
        self
    }

    pub fn paths(&self) -> ScenePaths {
        ScenePaths::new(&self.data_dir, &self.scene, &self.config)
    }

    pub fn network_config(&self) -> PathBuf {
        network_config_path(&self.config_dir, &self.config)
    }

    /// Step of the last snapshot the trainer produces.
    pub fn final_step(&self) -> u32 {
        self.max_step
            .checked_div(self.chunk_size)
            .map_or(0, |chunks| chunks * self.chunk_size)
    }

    pub fn remote_url(&self) -> Option<String> {
        self.remote
            .as_ref()
            .map(|root| format!("{}/{}/", root.trim_end_matches('/'), self.scene))
    }
}
