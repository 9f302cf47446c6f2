//! Per-step training telemetry.

use crate::error::Result;
use ngp_data::json::write_json;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

/// Engine state observed after one training step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: u32,
    pub loss: f32,
    /// Wall-clock time in seconds since the Unix epoch.
    pub time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth_weight: Option<f32>,
}

/// Telemetry file covering a whole training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingInfo {
    pub begin_time: f64,
    pub end_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u32>,
    pub max_step: u32,
    pub depth_supervision: bool,
    pub step_info: Vec<StepRecord>,
}

impl TrainingInfo {
    pub fn write(&self, path: &Path) -> Result<()> {
        info!(path = %path.display(), records = self.step_info.len(), "Saving training info");
        write_json(path, self, true)?;
        Ok(())
    }
}

/// Seconds since the Unix epoch.
pub fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
