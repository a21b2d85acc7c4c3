//! Error types for Vermont operations.
//!
//! This module defines [`VermontError`], the primary error type used
//! throughout the engine, and a [`Result`] type alias for convenience.
//!
//! # Error Handling Strategy
//!
//! - Use `VermontError` for domain-specific errors that need distinct handling
//! - Use `anyhow::Error` (via `VermontError::Other`) for unexpected errors
//! - All errors should carry enough context (job id, step ordinal, reference)
//!   to be actionable without a stack trace

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for Vermont operations.
#[derive(Debug, Error)]
pub enum VermontError {
    /// Configuration file not found at expected location.
    #[error("Configuration not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Failed to parse configuration file.
    #[error("Failed to parse config at {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    /// Workflow YAML is malformed or violates the schema.
    #[error("Failed to parse workflow {path}: {message}")]
    WorkflowParse { path: PathBuf, message: String },

    /// A `needs` entry references a job that does not exist.
    #[error("Job '{job}' depends on non-existent job '{dependency}'")]
    MissingDependency { job: String, dependency: String },

    /// The job dependency graph contains a cycle.
    #[error("Circular dependency detected: {cycle}")]
    CircularDependency { cycle: String },

    /// No job is ready, none are running, yet some are still pending.
    #[error("Workflow deadlock: no ready jobs but {pending} still pending")]
    Deadlock { pending: usize },

    /// The `uses:` string could not be parsed.
    #[error("Invalid action reference '{reference}' (expected owner/name@ref or ./path)")]
    ActionReferenceInvalid { reference: String },

    /// Network or VCS failure while materialising an action.
    #[error("Failed to fetch action '{reference}': {message}")]
    ActionFetchFailed { reference: String, message: String },

    /// No action.yml or action.yaml under the action root.
    #[error("Action metadata not found under {path}")]
    ActionNotFound { path: PathBuf },

    /// action.yml exists but does not parse.
    #[error("Invalid action metadata at {path}: {message}")]
    ActionMetadataInvalid { path: PathBuf, message: String },

    /// `runs.using` names a runtime this engine does not implement.
    #[error("Unsupported action runtime: {runtime}")]
    UnsupportedActionRuntime { runtime: String },

    /// A required action input has neither a value nor a default.
    #[error("Required input '{input}' not provided for action '{action}'")]
    InputValidation { action: String, input: String },

    /// Composite actions nested beyond the recursion limit.
    #[error("Action recursion limit exceeded: {chain}")]
    ActionRecursionLimit { chain: String },

    /// A step's container exited non-zero.
    #[error("Job '{job}' step {step} failed with exit code {code:?}")]
    StepFailed {
        job: String,
        step: usize,
        code: Option<i32>,
    },

    /// The container engine CLI is absent or not responding.
    #[error("Container engine '{runtime}' is not available")]
    ContainerUnavailable { runtime: String },

    /// Spawning or waiting on an external process failed.
    #[error("Command failed: {command}")]
    CommandFailed { command: String },

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic wrapped error for anyhow interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for Vermont operations.
pub type Result<T> = std::result::Result<T, VermontError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_parse_displays_path_and_message() {
        let err = VermontError::WorkflowParse {
            path: PathBuf::from("/ci/build.yml"),
            message: "jobs must not be empty".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/ci/build.yml"));
        assert!(msg.contains("jobs must not be empty"));
    }

    #[test]
    fn missing_dependency_displays_both_ids() {
        let err = VermontError::MissingDependency {
            job: "deploy".into(),
            dependency: "build".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("deploy"));
        assert!(msg.contains("build"));
    }

    #[test]
    fn circular_dependency_displays_cycle() {
        let err = VermontError::CircularDependency {
            cycle: "a -> b -> a".into(),
        };
        assert!(err.to_string().contains("a -> b -> a"));
    }

    #[test]
    fn action_reference_invalid_displays_reference() {
        let err = VermontError::ActionReferenceInvalid {
            reference: "actions/checkout".into(),
        };
        assert!(err.to_string().contains("actions/checkout"));
    }

    #[test]
    fn input_validation_displays_action_and_input() {
        let err = VermontError::InputValidation {
            action: "./greet".into(),
            input: "name".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("./greet"));
        assert!(msg.contains("name"));
    }

    #[test]
    fn step_failed_displays_exit_code() {
        let err = VermontError::StepFailed {
            job: "test".into(),
            step: 3,
            code: Some(2),
        };
        let msg = err.to_string();
        assert!(msg.contains("test"));
        assert!(msg.contains('3'));
        assert!(msg.contains('2'));
    }

    #[test]
    fn io_error_converts_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: VermontError = io_err.into();
        assert!(matches!(err, VermontError::Io(_)));
    }

    #[test]
    fn result_type_alias_works() {
        fn returns_error() -> Result<()> {
            Err(VermontError::Deadlock { pending: 2 })
        }
        assert!(returns_error().is_err());
    }
}
