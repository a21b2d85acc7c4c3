//! Workflow parsing and structural validation.
//!
//! Parsing validates the invariants that are meaningful before matrix
//! expansion: the workflow is named, has at least one job, every job has
//! a runner selector and at least one step, and every step has exactly
//! one of `run` / `uses`. Dependency existence and cycle-freedom are
//! checked later by the scheduler, after expansion.

use std::path::Path;

use crate::error::{Result, VermontError};
use crate::workflow::schema::{Job, Step, Workflow};

/// Parse a workflow file.
pub fn parse_file(path: &Path) -> Result<Workflow> {
    let source = std::fs::read_to_string(path).map_err(|e| VermontError::WorkflowParse {
        path: path.to_path_buf(),
        message: format!("failed to read workflow file: {e}"),
    })?;

    parse_str(&source, path)
}

/// Parse workflow YAML, attributing errors to `origin`.
pub fn parse_str(source: &str, origin: &Path) -> Result<Workflow> {
    let workflow: Workflow =
        serde_yaml::from_str(source).map_err(|e| VermontError::WorkflowParse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;

    validate(&workflow).map_err(|message| VermontError::WorkflowParse {
        path: origin.to_path_buf(),
        message,
    })?;

    Ok(workflow)
}

/// Structural validation applied at parse time.
fn validate(workflow: &Workflow) -> std::result::Result<(), String> {
    if workflow.name.trim().is_empty() {
        return Err("workflow name is required".to_string());
    }

    if workflow.jobs.is_empty() {
        return Err("workflow must contain at least one job".to_string());
    }

    for (job_id, job) in &workflow.jobs {
        validate_job(job).map_err(|message| format!("job '{job_id}': {message}"))?;
    }

    Ok(())
}

fn validate_job(job: &Job) -> std::result::Result<(), String> {
    if job.runs_on.is_empty() {
        return Err("runs-on is required".to_string());
    }

    if job.steps.is_empty() {
        return Err("job must contain at least one step".to_string());
    }

    for (index, step) in job.steps.iter().enumerate() {
        validate_step(step).map_err(|message| format!("step {}: {message}", index + 1))?;
    }

    Ok(())
}

fn validate_step(step: &Step) -> std::result::Result<(), String> {
    match (&step.run, &step.uses) {
        (None, None) => Err("step must have either 'run' or 'uses'".to_string()),
        (Some(_), Some(_)) => Err("step cannot have both 'run' and 'uses'".to_string()),
        _ => Ok(()),
    }
}
