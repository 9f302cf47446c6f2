//! A single training run on one testbed.

use crate::error::{Result, TrainError};
use crate::schedule::DepthSupervisionSchedule;
use crate::telemetry::{StepRecord, TrainingInfo, unix_time};
use indicatif::{ProgressBar, ProgressStyle};
use ngp_engine::Testbed;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Steps trained when a stand-alone session has no explicit target.
pub const DEFAULT_SESSION_STEPS: u32 = 100_000;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Build the progress bar used for training runs.
pub fn training_progress(total: u64, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Training [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} steps ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

/// Inputs of a stand-alone training run.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Training transform manifest.
    pub scene: Option<PathBuf>,
    pub network: Option<PathBuf>,
    pub load_snapshot: Option<PathBuf>,
    pub save_snapshot: Option<PathBuf>,
    /// Absolute step to train to; [`DEFAULT_SESSION_STEPS`] when unset.
    pub n_steps: Option<u32>,
    pub depth_supervision: bool,
    pub training_info: Option<PathBuf>,
    pub show_progress: bool,
}

/// Result of a stand-alone training run.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub begin_time: f64,
    pub end_time: f64,
    pub final_step: u32,
    pub steps_run: u64,
    pub records: Vec<StepRecord>,
}

/// Steps a testbed towards target step counts, collecting telemetry.
///
/// The session tracks the last step the engine reported. A step lower than
/// that is treated as an engine-side restart: local progress is reset and
/// training continues.
pub struct TrainingSession<'a> {
    engine: &'a mut dyn Testbed,
    schedule: Option<DepthSupervisionSchedule>,
    progress: ProgressBar,
    records: Vec<StepRecord>,
    steps_run: u64,
}

impl<'a> TrainingSession<'a> {
    pub fn new(
        engine: &'a mut dyn Testbed,
        schedule: Option<DepthSupervisionSchedule>,
        progress: ProgressBar,
    ) -> Self {
        Self {
            engine,
            schedule,
            progress,
            records: Vec::new(),
            steps_run: 0,
        }
    }

    /// Load the training manifest into the engine.
    pub fn load_scene(&mut self, manifest: &Path) -> Result<()> {
        if !manifest.is_file() {
            return Err(TrainError::MissingFile(manifest.to_path_buf()));
        }
        debug!(path = %manifest.display(), "Loading training data");
        self.engine.load_training_data(manifest)?;
        Ok(())
    }

    /// Initialise model state from a snapshot, or else from a network config.
    pub fn initialize(&mut self, snapshot: Option<&Path>, network: Option<&Path>) -> Result<()> {
        match (snapshot, network) {
            (Some(snapshot), _) => {
                if !snapshot.is_file() {
                    return Err(TrainError::MissingFile(snapshot.to_path_buf()));
                }
                info!("Loading snapshot {}", snapshot.display());
                self.engine.load_snapshot(snapshot)?;
            }
            (None, Some(network)) => {
                if !network.is_file() {
                    return Err(TrainError::MissingFile(network.to_path_buf()));
                }
                info!("Loading network config {}", network.display());
                self.engine.reload_network(network)?;
            }
            (None, None) => {
                return Err(TrainError::Configuration(
                    "a snapshot or a network config is required to start training".into(),
                ));
            }
        }

        if self.schedule.is_none() {
            self.engine.set_depth_supervision_lambda(0.0);
        }
        Ok(())
    }

    /// Train until the engine reports `target` or later. Returns the final step.
    pub fn train_until(&mut self, target: u32) -> Result<u32> {
        self.engine.set_training(true);
        let result = self.step_loop(target);
        self.engine.set_training(false);
        result
    }

    fn step_loop(&mut self, target: u32) -> Result<u32> {
        let mut last_seen = self.engine.training_step();
        let mut last_update: Option<Instant> = None;
        self.progress.set_position(u64::from(last_seen));

        while self.engine.training_step() < target {
            let weight = self.schedule.map(|s| {
                let w = s.weight(self.engine.training_step());
                self.engine.set_depth_supervision_lambda(w);
                w
            });

            if !self.engine.frame()? {
                warn!("Engine stopped before reaching step {}", target);
                break;
            }
            self.steps_run += 1;

            let step = self.engine.training_step();
            if step < last_seen {
                debug!(
                    "Engine step went back from {} to {}, treating as restart",
                    last_seen, step
                );
                self.progress.reset();
            }
            if step != last_seen {
                self.records.push(StepRecord {
                    step,
                    loss: self.engine.loss(),
                    time: unix_time(),
                    depth_weight: weight,
                });
            }
            last_seen = step;

            let now = Instant::now();
            if last_update.is_none_or(|t| now - t > PROGRESS_INTERVAL) {
                self.progress.set_position(u64::from(step));
                self.progress
                    .set_message(format!("loss={:.5}", self.engine.loss()));
                last_update = Some(now);
            }
        }

        let final_step = self.engine.training_step();
        self.progress.set_position(u64::from(final_step));
        Ok(final_step)
    }

    /// Persist the current model state, creating the parent directory.
    pub fn save_snapshot(&mut self, path: &Path) -> Result<()> {
        ngp_data::json::ensure_parent_dir(path)?;
        self.engine.save_snapshot(path)?;
        Ok(())
    }

    pub fn steps_run(&self) -> u64 {
        self.steps_run
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    pub fn finish(self) -> (Vec<StepRecord>, u64) {
        self.progress.finish_and_clear();
        (self.records, self.steps_run)
    }

    /// Run one complete session: load, train to `n_steps`, then persist.
    #[tracing::instrument(skip_all)]
    pub fn run(engine: &'a mut dyn Testbed, config: &SessionConfig) -> Result<SessionOutcome> {
        let n_steps = config.n_steps.unwrap_or(DEFAULT_SESSION_STEPS);
        let schedule = config
            .depth_supervision
            .then(DepthSupervisionSchedule::default);
        let progress = training_progress(u64::from(n_steps), config.show_progress);
        let mut session = TrainingSession::new(engine, schedule, progress);

        if let Some(scene) = &config.scene {
            session.load_scene(scene)?;
        }
        session.initialize(config.load_snapshot.as_deref(), config.network.as_deref())?;

        let begin_time = unix_time();
        let final_step = session.train_until(n_steps)?;
        let end_time = unix_time();

        if let Some(path) = &config.save_snapshot {
            info!("Saving snapshot {}", path.display());
            session.save_snapshot(path)?;
        }

        let (records, steps_run) = session.finish();

        if let Some(path) = &config.training_info {
            TrainingInfo {
                begin_time,
                end_time,
                chunk_size: None,
                max_step: n_steps,
                depth_supervision: config.depth_supervision,
                step_info: records.clone(),
            }
            .write(path)?;
        }

        Ok(SessionOutcome {
            begin_time,
            end_time,
            final_step,
            steps_run,
            records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ngp_engine::SyntheticTestbed;
    use std::fs;

    fn network_file(dir: &Path) -> PathBuf {
        let path = dir.join("base.json");
        fs::write(&path, r#"{"loss": {"otype": "Huber"}}"#).unwrap();
        path
    }

    #[test]
    fn test_requires_snapshot_or_network() {
        let mut engine = SyntheticTestbed::new();
        let config = SessionConfig {
            n_steps: Some(10),
            ..Default::default()
        };
        let err = TrainingSession::run(&mut engine, &config).unwrap_err();
        assert!(matches!(err, TrainError::Configuration(_)));
        assert_eq!(engine.stats().frames, 0);
    }

    #[test]
    fn test_session_trains_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = SyntheticTestbed::new();
        let snapshot = dir.path().join("out/snap_40.msgpack");
        let info = dir.path().join("out/training.json");
        let config = SessionConfig {
            network: Some(network_file(dir.path())),
            save_snapshot: Some(snapshot.clone()),
            n_steps: Some(40),
            training_info: Some(info.clone()),
            ..Default::default()
        };

        let outcome = TrainingSession::run(&mut engine, &config).unwrap();
        assert_eq!(outcome.final_step, 40);
        assert_eq!(outcome.steps_run, 40);
        assert_eq!(outcome.records.len(), 40);
        assert_eq!(outcome.records.last().unwrap().step, 40);
        assert!(outcome.records.iter().all(|r| r.depth_weight.is_none()));
        assert!(snapshot.is_file());

        let written: TrainingInfo =
            serde_json::from_str(&fs::read_to_string(&info).unwrap()).unwrap();
        assert_eq!(written.step_info.len(), 40);
        assert_eq!(written.max_step, 40);
        assert!(written.end_time >= written.begin_time);
    }

    #[test]
    fn test_resume_from_snapshot_only_trains_remaining_steps() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("snap_30.msgpack");
        let mut engine = SyntheticTestbed::new();
        TrainingSession::run(
            &mut engine,
            &SessionConfig {
                network: Some(network_file(dir.path())),
                save_snapshot: Some(snapshot.clone()),
                n_steps: Some(30),
                ..Default::default()
            },
        )
        .unwrap();

        let mut resumed = SyntheticTestbed::new();
        let outcome = TrainingSession::run(
            &mut resumed,
            &SessionConfig {
                load_snapshot: Some(snapshot),
                n_steps: Some(50),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(outcome.final_step, 50);
        assert_eq!(resumed.stats().training_steps, 20);
    }

    #[test]
    fn test_step_regression_resets_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = SyntheticTestbed::new();
        engine.schedule_restart(30);
        let outcome = TrainingSession::run(
            &mut engine,
            &SessionConfig {
                network: Some(network_file(dir.path())),
                n_steps: Some(50),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(outcome.final_step, 50);
        assert!(
            outcome
                .records
                .windows(2)
                .any(|w| w[1].step < w[0].step)
        );
        assert_eq!(outcome.steps_run, 80);
    }

    #[test]
    fn test_depth_supervision_weight_applied() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = SyntheticTestbed::new();
        let outcome = TrainingSession::run(
            &mut engine,
            &SessionConfig {
                network: Some(network_file(dir.path())),
                n_steps: Some(2100),
                depth_supervision: true,
                ..Default::default()
            },
        )
        .unwrap();

        let first = outcome.records.first().unwrap();
        assert_eq!(first.depth_weight, Some(1.0));
        let last = outcome.records.last().unwrap();
        assert_eq!(last.depth_weight, Some(0.2));
        assert_eq!(engine.depth_supervision_lambda(), 0.2);
    }

    #[test]
    fn test_missing_snapshot_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = SyntheticTestbed::new();
        let err = TrainingSession::run(
            &mut engine,
            &SessionConfig {
                load_snapshot: Some(dir.path().join("snap_2000.msgpack")),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, TrainError::MissingFile(_)));
    }
}
