//! NGP Training Crate
//!
//! Drives a [`Testbed`](ngp_engine::Testbed) through training in fixed-size
//! chunks, checkpointing a snapshot at every chunk boundary so an interrupted
//! run resumes where it stopped.
//!
//! ## Modules
//!
//! - [`snapshot`]: canonical snapshot paths and the resume signal
//! - [`schedule`]: depth-supervision weight annealing
//! - [`session`]: a single engine training run up to a target step
//! - [`trainer`]: the chunked, resumable trainer
//! - [`telemetry`]: per-step records and the training info file

mod error;
pub mod schedule;
pub mod session;
pub mod snapshot;
pub mod telemetry;
pub mod trainer;

pub use error::{Result, TrainError};
pub use schedule::DepthSupervisionSchedule;
pub use session::{SessionConfig, SessionOutcome, TrainingSession};
pub use snapshot::SnapshotStore;
pub use telemetry::{StepRecord, TrainingInfo};
pub use trainer::{IncrementalTrainer, TrainerConfig, TrainingReport};
