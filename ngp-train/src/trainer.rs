//! Chunked, resumable training.
//!
//! `[0, max_step)` is split into chunks of `chunk_size` steps. The chunk
//! ending at step `N` produces `snap_N.msgpack`, and is skipped entirely when
//! that file already exists. Every other chunk resumes from the previous
//! chunk's snapshot, so the snapshots on disk always form a chain and the
//! process can be stopped between chunks without losing completed work.

use crate::error::{Result, TrainError};
use crate::schedule::DepthSupervisionSchedule;
use crate::session::{TrainingSession, training_progress};
use crate::snapshot::SnapshotStore;
use crate::telemetry::{StepRecord, TrainingInfo, unix_time};
use ngp_engine::Testbed;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::info;

pub const DEFAULT_CHUNK_SIZE: u32 = 2000;
pub const DEFAULT_MAX_STEP: u32 = 20_000;

/// Configuration for [`IncrementalTrainer`].
#[derive(Debug, Clone)]
pub struct TrainerConfig {
    pub snapshot_dir: PathBuf,
    /// Training transform manifest.
    pub manifest: Option<PathBuf>,
    pub network: Option<PathBuf>,
    /// Snapshot to start the first chunk from instead of the network config.
    pub resume_from: Option<PathBuf>,
    pub chunk_size: u32,
    pub max_step: u32,
    pub depth_supervision: bool,
    /// Telemetry file written once the whole run completes.
    pub training_info: Option<PathBuf>,
    pub show_progress: bool,
}

impl TrainerConfig {
    pub fn new(snapshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_dir: snapshot_dir.into(),
            manifest: None,
            network: None,
            resume_from: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_step: DEFAULT_MAX_STEP,
            depth_supervision: false,
            training_info: None,
            show_progress: false,
        }
    }

    pub fn with_manifest(mut self, manifest: impl Into<PathBuf>) -> Self {
        self.manifest = Some(manifest.into());
        self
    }

    pub fn with_network(mut self, network: impl Into<PathBuf>) -> Self {
        self.network = Some(network.into());
        self
    }

    pub fn with_resume_from(mut self, snapshot: impl Into<PathBuf>) -> Self {
        self.resume_from = Some(snapshot.into());
        self
    }

    pub fn with_steps(mut self, chunk_size: u32, max_step: u32) -> Self {
        self.chunk_size = chunk_size;
        self.max_step = max_step;
        self
    }

    pub fn with_depth_supervision(mut self, enabled: bool) -> Self {
        self.depth_supervision = enabled;
        self
    }

    pub fn with_training_info(mut self, path: impl Into<PathBuf>) -> Self {
        self.training_info = Some(path.into());
        self
    }

    pub fn with_progress(mut self, visible: bool) -> Self {
        self.show_progress = visible;
        self
    }

    /// Number of complete chunks; a trailing partial chunk is not trained.
    pub fn chunk_count(&self) -> u32 {
        self.max_step.checked_div(self.chunk_size).unwrap_or(0)
    }
}

/// What an incremental training run did.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub chunks_total: u32,
    pub chunks_trained: u32,
    pub chunks_skipped: u32,
    pub final_snapshot: PathBuf,
    pub steps_run: u64,
    pub records: Vec<StepRecord>,
    pub elapsed: Duration,
}

pub struct IncrementalTrainer {
    config: TrainerConfig,
    store: SnapshotStore,
}

impl IncrementalTrainer {
    pub fn new(config: TrainerConfig) -> Self {
        let store = SnapshotStore::new(&config.snapshot_dir);
        Self { config, store }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    fn validate(&self) -> Result<u32> {
        if self.config.chunk_size == 0 {
            return Err(TrainError::Configuration(
                "chunk size must be positive".into(),
            ));
        }
        let chunks = self.config.chunk_count();
        if chunks == 0 {
            return Err(TrainError::Configuration(format!(
                "max step {} is smaller than one chunk of {} steps",
                self.config.max_step, self.config.chunk_size
            )));
        }
        if self.config.max_step % self.config.chunk_size != 0 {
            tracing::warn!(
                "max step {} is not a multiple of chunk size {}; training stops at step {}",
                self.config.max_step,
                self.config.chunk_size,
                chunks * self.config.chunk_size
            );
        }
        Ok(chunks)
    }

    /// Run every missing chunk. Existing snapshots are left untouched.
    #[tracing::instrument(skip_all, fields(dir = %self.store.dir().display()))]
    pub fn run(&self, engine: &mut dyn Testbed) -> Result<TrainingReport> {
        let chunks = self.validate()?;
        let chunk = self.config.chunk_size;
        self.store.ensure_dir()?;

        if let Some(latest) = self.store.latest()? {
            info!("Found existing snapshots up to step {}", latest);
        }

        let started = Instant::now();
        let begin_time = unix_time();
        let schedule = self
            .config
            .depth_supervision
            .then(DepthSupervisionSchedule::default);
        let progress = training_progress(
            u64::from(chunks * chunk),
            self.config.show_progress,
        );
        let mut session = TrainingSession::new(engine, schedule, progress);
        let mut scene_loaded = false;
        let mut trained = 0;
        let mut skipped = 0;

        for i in 0..chunks {
            let target = (i + 1) * chunk;
            info!("--- Run Step {} to {} ---", i * chunk, target);

            let snapshot = self.store.path(target);
            if snapshot.is_file() {
                info!("Snapshot already exists, continue...");
                skipped += 1;
                continue;
            }

            // Dataset first: loading it resets model state in the engine.
            if !scene_loaded {
                if let Some(manifest) = &self.config.manifest {
                    session.load_scene(manifest)?;
                }
                scene_loaded = true;
            }

            if i == 0 {
                session.initialize(
                    self.config.resume_from.as_deref(),
                    self.config.network.as_deref(),
                )?;
            } else {
                let previous = self.store.path(i * chunk);
                if !previous.is_file() {
                    return Err(TrainError::MissingFile(previous));
                }
                session.initialize(Some(&previous), None)?;
            }

            let reached = session.train_until(target)?;
            if reached < target {
                return Err(TrainError::Interrupted { target, reached });
            }
            info!("Saving snapshot {}", snapshot.display());
            session.save_snapshot(&snapshot)?;
            trained += 1;
        }

        let end_time = unix_time();
        let (records, steps_run) = session.finish();

        if let Some(path) = &self.config.training_info {
            TrainingInfo {
                begin_time,
                end_time,
                chunk_size: Some(chunk),
                max_step: self.config.max_step,
                depth_supervision: self.config.depth_supervision,
                step_info: records.clone(),
            }
            .write(path)?;
        }

        info!(
            trained,
            skipped,
            steps_run,
            "Training finished in {:.1}s",
            started.elapsed().as_secs_f64()
        );

        Ok(TrainingReport {
            chunks_total: chunks,
            chunks_trained: trained,
            chunks_skipped: skipped,
            final_snapshot: self.store.path(chunks * chunk),
            steps_run,
            records,
            elapsed: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ngp_engine::Result as EngineResult;
    use ngp_engine::{DensityGrid, RenderSettings, SyntheticTestbed, TrainingView};
    use std::fs;
    use std::path::Path;

    /// Logs the model and dataset calls it forwards, and stops stepping once
    /// `stop_at` is reached.
    #[derive(Default)]
    struct RecordingTestbed {
        inner: SyntheticTestbed,
        stop_at: Option<u32>,
        calls: Vec<String>,
    }

    fn file_name(path: &Path) -> String {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    impl Testbed for RecordingTestbed {
        fn load_training_data(&mut self, manifest: &Path) -> EngineResult<()> {
            self.calls.push("load_training_data".into());
            self.inner.load_training_data(manifest)
        }
        fn training_views(&self) -> &[TrainingView] {
            self.inner.training_views()
        }
        fn load_snapshot(&mut self, path: &Path) -> EngineResult<()> {
            self.calls.push(format!("load_snapshot {}", file_name(path)));
            self.inner.load_snapshot(path)
        }
        fn save_snapshot(&mut self, path: &Path) -> EngineResult<()> {
            self.calls.push(format!("save_snapshot {}", file_name(path)));
            self.inner.save_snapshot(path)
        }
        fn reload_network(&mut self, config: &Path) -> EngineResult<()> {
            self.calls.push("reload_network".into());
            self.inner.reload_network(config)
        }
        fn set_training(&mut self, enabled: bool) {
            self.inner.set_training(enabled)
        }
        fn set_depth_supervision_lambda(&mut self, lambda: f32) {
            self.inner.set_depth_supervision_lambda(lambda)
        }
        fn frame(&mut self) -> EngineResult<bool> {
            if self.stop_at.is_some_and(|s| self.inner.training_step() >= s) {
                return Ok(false);
            }
            self.inner.frame()
        }
        fn training_step(&self) -> u32 {
            self.inner.training_step()
        }
        fn loss(&self) -> f32 {
            self.inner.loss()
        }
        fn apply_render_settings(&mut self, settings: &RenderSettings) {
            self.inner.apply_render_settings(settings)
        }
        fn init_window(&mut self, width: u32, height: u32) -> EngineResult<()> {
            self.inner.init_window(width, height)
        }
        fn set_camera_matrix(&mut self, camera: &glam::Affine3A) {
            self.inner.set_camera_matrix(camera)
        }
        fn set_camera_to_training_view(&mut self, index: usize) -> EngineResult<()> {
            self.inner.set_camera_to_training_view(index)
        }
        fn reset_accumulation(&mut self) {
            self.inner.reset_accumulation()
        }
        fn render(&mut self, width: u32, height: u32, spp: u32) -> EngineResult<image::Rgba32FImage> {
            self.inner.render(width, height, spp)
        }
        fn screenshot(&mut self) -> EngineResult<image::Rgba32FImage> {
            self.inner.screenshot()
        }
        fn compute_density_grid(
            &mut self,
            resolution: u32,
            aabb: &ngp_data::BoundingBox,
        ) -> EngineResult<DensityGrid> {
            self.inner.compute_density_grid(resolution, aabb)
        }
    }

    fn manifest_file(dir: &Path) -> PathBuf {
        let path = dir.join("training.json");
        let manifest = r#"{"camera_angle_x": 0.8, "w": 16, "h": 12, "frames": [
            {"file_path": "./images/r_0",
             "transform_matrix": [[1,0,0,0],[0,1,0,0],[0,0,1,3],[0,0,0,1]]}
        ]}"#;
        fs::write(&path, manifest).unwrap();
        path
    }

    fn network_file(dir: &Path) -> PathBuf {
        let path = dir.join("base.json");
        fs::write(&path, r#"{"network": {"n_neurons": 64}}"#).unwrap();
        path
    }

    fn config(dir: &Path, chunk: u32, max_step: u32) -> TrainerConfig {
        TrainerConfig::new(dir.join("snapshot"))
            .with_network(network_file(dir))
            .with_steps(chunk, max_step)
    }

    #[test]
    fn test_rerun_is_idempotent() {
        for chunk in [1, 5, 10, 25, 50] {
            let dir = tempfile::tempdir().unwrap();
            let trainer = IncrementalTrainer::new(config(dir.path(), chunk, 50));

            let mut engine = SyntheticTestbed::new();
            let report = trainer.run(&mut engine).unwrap();
            assert_eq!(engine.stats().training_steps, 50, "chunk {chunk}");
            assert_eq!(report.chunks_trained, 50 / chunk);
            assert!(report.final_snapshot.ends_with("snap_50.msgpack"));

            let mut again = SyntheticTestbed::new();
            let report = trainer.run(&mut again).unwrap();
            assert_eq!(again.stats().training_steps, 0, "chunk {chunk}");
            assert_eq!(again.stats().frames, 0);
            assert_eq!(report.chunks_skipped, 50 / chunk);
        }
    }

    #[test]
    fn test_snapshot_chain_written() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = IncrementalTrainer::new(config(dir.path(), 10, 30));
        let mut engine = SyntheticTestbed::new();
        trainer.run(&mut engine).unwrap();

        for step in [10, 20, 30] {
            assert!(trainer.store().exists(step));
        }
        assert_eq!(engine.stats().snapshots_saved, 3);
        // Chunks after the first resume from their predecessor.
        assert_eq!(engine.stats().snapshots_loaded, 2);
    }

    #[test]
    fn test_resume_after_interruption() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = IncrementalTrainer::new(config(dir.path(), 10, 40));
        trainer.run(&mut SyntheticTestbed::new()).unwrap();

        fs::remove_file(trainer.store().path(40)).unwrap();
        fs::remove_file(trainer.store().path(30)).unwrap();

        let mut engine = SyntheticTestbed::new();
        let report = trainer.run(&mut engine).unwrap();
        assert_eq!(report.chunks_skipped, 2);
        assert_eq!(report.chunks_trained, 2);
        assert_eq!(engine.stats().training_steps, 20);
        assert!(trainer.store().exists(40));
    }

    #[test]
    fn test_first_chunk_needs_network_or_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = IncrementalTrainer::new(
            TrainerConfig::new(dir.path().join("snapshot")).with_steps(10, 20),
        );
        let err = trainer.run(&mut SyntheticTestbed::new()).unwrap_err();
        assert!(matches!(err, TrainError::Configuration(_)));
    }

    #[test]
    fn test_corrupt_predecessor_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = IncrementalTrainer::new(config(dir.path(), 10, 30));
        trainer.store().ensure_dir().unwrap();
        fs::write(trainer.store().path(20), b"placeholder").unwrap();

        // Chunk 0 trains from the network, chunk 1 is skipped and chunk 2
        // loads the unreadable snapshot for step 20.
        let err = trainer.run(&mut SyntheticTestbed::new()).unwrap_err();
        assert!(matches!(err, TrainError::Engine(_)));
        assert!(trainer.store().exists(10));
        assert!(!trainer.store().exists(30));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = IncrementalTrainer::new(config(dir.path(), 0, 30));
        assert!(matches!(
            trainer.run(&mut SyntheticTestbed::new()),
            Err(TrainError::Configuration(_))
        ));
    }

    #[test]
    fn test_training_info_written_once_for_whole_run() {
        let dir = tempfile::tempdir().unwrap();
        let info_path = dir.path().join("training_info.json");
        let trainer = IncrementalTrainer::new(
            config(dir.path(), 1000, 3000)
                .with_depth_supervision(true)
                .with_training_info(&info_path),
        );
        let mut engine = SyntheticTestbed::new();
        trainer.run(&mut engine).unwrap();

        let info: TrainingInfo =
            serde_json::from_str(&fs::read_to_string(&info_path).unwrap()).unwrap();
        assert_eq!(info.step_info.len(), 3000);
        assert_eq!(info.chunk_size, Some(1000));
        assert!(info.depth_supervision);
        assert_eq!(info.step_info[0].depth_weight, Some(1.0));
        assert_eq!(info.step_info[2999].depth_weight, Some(0.2));
        assert_eq!(engine.depth_supervision_lambda(), 0.2);
    }

    #[test]
    fn test_stopped_engine_leaves_chunk_unsaved() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = IncrementalTrainer::new(config(dir.path(), 10, 20));
        let mut engine = RecordingTestbed {
            stop_at: Some(4),
            ..Default::default()
        };

        let err = trainer.run(&mut engine).unwrap_err();
        assert!(matches!(
            err,
            TrainError::Interrupted {
                target: 10,
                reached: 4
            }
        ));
        assert!(!trainer.store().exists(10));
        assert!(!trainer.store().exists(20));
        assert!(!engine.calls.iter().any(|c| c.starts_with("save_snapshot")));

        // The next run starts the chunk over instead of skipping it.
        let mut engine = SyntheticTestbed::new();
        let report = trainer.run(&mut engine).unwrap();
        assert_eq!(report.chunks_trained, 2);
        assert_eq!(engine.stats().training_steps, 20);
    }

    #[test]
    fn test_dataset_loaded_before_model() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = IncrementalTrainer::new(
            config(dir.path(), 10, 30).with_manifest(manifest_file(dir.path())),
        );
        trainer.run(&mut SyntheticTestbed::new()).unwrap();
        fs::remove_file(trainer.store().path(30)).unwrap();

        let mut engine = RecordingTestbed::default();
        trainer.run(&mut engine).unwrap();
        assert_eq!(
            engine.calls,
            vec![
                "load_training_data",
                "load_snapshot snap_20.msgpack",
                "save_snapshot snap_30.msgpack",
            ]
        );
    }
}
