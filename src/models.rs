use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Loudness statistics measured by the analysis pass for one input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoudnessMeasurement {
    /// Integrated loudness (mean volume) in dB.
    pub integrated_db: f64,
    /// Maximum sample peak in dBFS.
    pub peak_db: f64,
    /// Noise floor in dB, when the engine reports one.
    #[serde(default)]
    pub noise_floor_db: Option<f64>,
}

/// Adjustment the apply pass must perform to reach the target loudness.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GainPlan {
    /// Flat gain in dB.
    pub gain_db: f64,
    /// True when flat gain alone would push the peak above the ceiling.
    pub limiter_needed: bool,
    /// Ceiling the limiter must enforce, in dBFS.
    pub effective_ceiling: f64,
}

impl GainPlan {
    /// A plan that re-encodes without touching levels (silent input, or
    /// already at target).
    pub fn is_passthrough(&self) -> bool {
        self.gain_db == 0.0 && !self.limiter_needed
    }
}

/// Lifecycle of a single normalization job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Analyzing,
    Computing,
    Applying,
    Done,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Pending => "pending",
            JobState::Analyzing => "analyzing",
            JobState::Computing => "computing",
            JobState::Applying => "applying",
            JobState::Done => "done",
            JobState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Final outcome of one job, written exactly once by its owning worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub input: PathBuf,
    pub output: PathBuf,
    pub state: JobState,
    pub measurement: Option<LoudnessMeasurement>,
    pub plan: Option<GainPlan>,
    pub error: Option<String>,
}

/// Aggregate of a whole batch, records in input discovery order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub records: Vec<FileRecord>,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchResult {
    pub fn from_records(records: Vec<FileRecord>) -> Self {
        let succeeded = records
            .iter()
            .filter(|r| r.state == JobState::Done)
            .count();
        let failed = records.len() - succeeded;
        BatchResult {
            records,
            succeeded,
            failed,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}
