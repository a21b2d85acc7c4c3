//! Job scheduling state.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::workflow::Job;

/// Execution status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for dependencies.
    Pending,

    /// Dependencies satisfied, not yet started.
    Ready,

    /// Currently executing.
    Running,

    /// Finished successfully.
    Completed,

    /// Finished with a failure.
    Failed,

    /// Never ran because a dependency failed or the run was abandoned.
    Skipped,
}

impl JobStatus {
    /// Whether no further transitions are expected.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Skipped
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Ready => "ready",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// Result of a single executed step.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    /// Display label.
    pub label: String,

    /// Whether the step succeeded.
    pub success: bool,

    /// Combined stdout/stderr.
    pub output: String,

    /// Error description when failed.
    pub error: Option<String>,

    /// Wall-clock duration.
    pub duration: Duration,

    /// Outputs collected from the output sidecar.
    pub outputs: HashMap<String, String>,
}

impl StepOutcome {
    /// A successful outcome.
    pub fn success(label: &str, output: String, duration: Duration) -> Self {
        Self {
            label: label.to_string(),
            success: true,
            output,
            error: None,
            duration,
            outputs: HashMap::new(),
        }
    }

    /// A failed outcome.
    pub fn failure(label: &str, output: String, error: String, duration: Duration) -> Self {
        Self {
            label: label.to_string(),
            success: false,
            output,
            error: Some(error),
            duration,
            outputs: HashMap::new(),
        }
    }

    /// The trailing portion of the combined output, for failure reports.
    pub fn output_tail(&self, max_lines: usize) -> String {
        let lines: Vec<&str> = self.output.lines().collect();
        let start = lines.len().saturating_sub(max_lines);
        lines[start..].join("\n")
    }
}

/// Result of a finished job.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    /// Whether every counted step succeeded.
    pub success: bool,

    /// Per-step outcomes in execution order.
    pub steps: Vec<StepOutcome>,

    /// Union of the job's step outputs.
    pub outputs: HashMap<String, String>,

    /// Wall-clock duration.
    pub duration: Duration,
}

/// A job plus its scheduling state.
#[derive(Debug, Clone, Serialize)]
pub struct JobState {
    /// Job id (post-expansion).
    pub id: String,

    /// The job definition.
    pub job: Job,

    /// Current status.
    pub status: JobStatus,

    /// Direct dependencies.
    pub dependencies: Vec<String>,

    /// When the worker picked the job up.
    pub started_at: Option<DateTime<Utc>>,

    /// When the worker finished.
    pub finished_at: Option<DateTime<Utc>>,

    /// Final result, present once terminal (except for skips).
    pub result: Option<JobResult>,
}

impl JobState {
    /// Initial state for a parsed job.
    pub fn new(id: &str, job: &Job) -> Self {
        Self {
            id: id.to_string(),
            job: job.clone(),
            status: JobStatus::Pending,
            dependencies: job.needs.clone(),
            started_at: None,
            finished_at: None,
            result: None,
        }
    }

    /// First failing step, if any.
    pub fn first_failure(&self) -> Option<(usize, &StepOutcome)> {
        self.result
            .as_ref()?
            .steps
            .iter()
            .enumerate()
            .find(|(_, step)| !step.success)
    }
}
