use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Infrastructure-level failures while driving the external engine.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The engine did not exit within the configured wall-clock budget.
    #[error("engine timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The engine process could not be started or waited on.
    #[error("failed to run engine: {0}")]
    SpawnFailure(#[source] std::io::Error),

    /// The engine binary does not exist on the configured path.
    #[error("engine binary not found: {0}")]
    EngineUnavailable(String),

    /// The batch was cancelled while this invocation was in flight.
    #[error("cancelled")]
    Cancelled,
}

impl ProcessError {
    /// Transient failures are worth one retry with identical arguments.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProcessError::Timeout(_) | ProcessError::SpawnFailure(_))
    }
}

/// Failures while interpreting the engine's diagnostic text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A required label never appeared in the diagnostics.
    #[error("no `{0}` line found in engine diagnostics")]
    MissingField(&'static str),

    /// A recognized label was followed by something that is not a number.
    #[error("label `{label}` followed by unparseable token `{token}`")]
    MalformedNumber { label: String, token: String },
}

/// Terminal failure reason for a single normalization job.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("engine binary not found: {0}")]
    EngineUnavailable(String),

    #[error("engine timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("failed to run engine: {0}")]
    SpawnFailure(String),

    #[error("unrecognized analysis output: {0}")]
    UnrecognizedOutput(#[from] ParseError),

    #[error("encode pass failed (exit code {code:?}): {detail}")]
    EncodeFailed { code: Option<i32>, detail: String },

    #[error("encode pass succeeded but left no output at {}", .0.display())]
    OutputMissing(PathBuf),

    #[error("batch cancelled")]
    Cancelled,
}

impl From<ProcessError> for JobError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::Timeout(t) => JobError::Timeout(t),
            ProcessError::SpawnFailure(e) => JobError::SpawnFailure(e.to_string()),
            ProcessError::EngineUnavailable(path) => JobError::EngineUnavailable(path),
            ProcessError::Cancelled => JobError::Cancelled,
        }
    }
}
