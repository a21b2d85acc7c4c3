//! Workflow execution orchestration.
//!
//! The [`Engine`] facade wires the pipeline together: parse the
//! workflow, expand matrix jobs, validate the dependency graph, and hand
//! the concrete job set to the scheduler. Each run gets a fresh
//! workspace under the configured work directory, removed on exit
//! regardless of outcome.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::info;

use crate::actions::ActionResolver;
use crate::config::Config;
use crate::container::ContainerEngine;
use crate::engine::context::{github_properties, slugify};
use crate::engine::graph::JobGraph;
use crate::engine::scheduler::Scheduler;
use crate::engine::state::JobState;
use crate::engine::step::StepExecutor;
use crate::error::{Result, VermontError};
use crate::workflow::{self, Workflow};

/// Result of a full workflow run.
#[derive(Debug, serde::Serialize)]
pub struct RunSummary {
    /// Workflow name.
    pub workflow: String,

    /// Final state of every job, keyed by id.
    pub jobs: BTreeMap<String, JobState>,

    /// True iff every job completed successfully.
    pub success: bool,

    /// Description of the first failure, when the run failed.
    pub first_failure: Option<String>,

    /// Total wall-clock duration.
    pub duration: Duration,
}

/// The execution engine: parse, expand, schedule, execute.
pub struct Engine {
    config: Config,
    container: ContainerEngine,
    resolver: ActionResolver,
}

impl Engine {
    /// Build an engine from a configuration record.
    pub fn new(config: Config) -> Self {
        let container = ContainerEngine::new(
            &config.container.runtime,
            &config.container.network_mode,
            &config.container.default_image,
        );

        let resolver = ActionResolver::new(
            config.storage.cache_dir.join("actions"),
            &config.actions.registry,
        )
        .with_cache_enabled(config.actions.cache_enabled);

        Self {
            config,
            container,
            resolver,
        }
    }

    /// The configuration this engine was built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Execute a workflow file end to end.
    pub fn run(&self, workflow_path: &Path) -> Result<RunSummary> {
        let start = Instant::now();

        let parsed = workflow::parse_file(workflow_path)?;
        info!(workflow = %parsed.name, "Executing workflow");

        if !self.container.is_available() {
            return Err(VermontError::ContainerUnavailable {
                runtime: self.container.runtime().to_string(),
            });
        }

        let jobs = workflow::expand_jobs(&parsed.jobs);

        // The per-run workspace is removed when `run_dir` drops, on
        // every exit path.
        std::fs::create_dir_all(&self.config.runner.work_dir)?;
        let run_dir = tempfile::Builder::new()
            .prefix(&format!("{}-", slugify(&parsed.name)))
            .tempdir_in(&self.config.runner.work_dir)?;

        let executor = self.step_executor(&parsed)?;
        let scheduler = Scheduler::new(&executor, self.config.runner.max_concurrent_jobs);

        let report = scheduler.execute(&jobs, run_dir.path())?;

        self.container.prune();

        let success = report.success();
        info!(
            workflow = %parsed.name,
            jobs = report.jobs.len(),
            success,
            "Workflow execution finished"
        );

        Ok(RunSummary {
            workflow: parsed.name,
            jobs: report.jobs,
            success,
            first_failure: report.first_failure,
            duration: start.elapsed(),
        })
    }

    /// Parse, expand, and validate a workflow without executing it.
    /// Returns the expanded job count.
    pub fn validate(&self, workflow_path: &Path) -> Result<usize> {
        let parsed = workflow::parse_file(workflow_path)?;
        let jobs = workflow::expand_jobs(&parsed.jobs);

        let graph = JobGraph::build(&jobs)?;
        graph.ensure_acyclic()?;

        Ok(jobs.len())
    }

    fn step_executor(&self, parsed: &Workflow) -> Result<StepExecutor<'_>> {
        let config_env = self.config.environment();
        let invocation_dir = std::env::current_dir()?;

        Ok(StepExecutor {
            container: &self.container,
            resolver: &self.resolver,
            github: github_properties(&config_env, Some(&invocation_dir)),
            config_env,
            workflow_env: parsed.env.clone(),
            local_action_root: invocation_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, StorageConfig};
    use tempfile::TempDir;

    fn sandboxed_config(temp: &TempDir) -> Config {
        let mut config = Config::default();
        config.storage = StorageConfig::for_data_dir(&temp.path().join("data"));
        config.runner.work_dir = temp.path().join("work");
        config.container.runtime = "vermont-no-such-runtime".to_string();
        config
    }

    fn write_workflow(temp: &TempDir, yaml: &str) -> std::path::PathBuf {
        let path = temp.path().join("workflow.yml");
        std::fs::write(&path, yaml).unwrap();
        path
    }

    #[test]
    fn run_requires_a_container_engine() {
        let temp = TempDir::new().unwrap();
        let engine = Engine::new(sandboxed_config(&temp));
        let path = write_workflow(
            &temp,
            "name: t\njobs:\n  a:\n    runs-on: alpine\n    steps:\n      - run: exit 0",
        );

        let result = engine.run(&path);
        assert!(matches!(
            result,
            Err(VermontError::ContainerUnavailable { .. })
        ));
    }

    #[test]
    fn validate_accepts_a_good_workflow() {
        let temp = TempDir::new().unwrap();
        let engine = Engine::new(sandboxed_config(&temp));
        let path = write_workflow(
            &temp,
            r#"
            name: ok
            jobs:
              build:
                runs-on: ubuntu-latest
                strategy:
                  matrix:
                    os: [a, b]
                steps:
                  - run: echo ${{ matrix.os }}
              deploy:
                runs-on: ubuntu-latest
                steps:
                  - run: echo done
            "#,
        );

        // Matrix expansion yields two build jobs plus deploy.
        assert_eq!(engine.validate(&path).unwrap(), 3);
    }

    #[test]
    fn validate_rejects_missing_dependency() {
        let temp = TempDir::new().unwrap();
        let engine = Engine::new(sandboxed_config(&temp));
        let path = write_workflow(
            &temp,
            "name: t\njobs:\n  a:\n    runs-on: alpine\n    needs: ghost\n    steps:\n      - run: exit 0",
        );

        let result = engine.validate(&path);
        assert!(matches!(
            result,
            Err(VermontError::MissingDependency { .. })
        ));
    }

    #[test]
    fn validate_rejects_cycles() {
        let temp = TempDir::new().unwrap();
        let engine = Engine::new(sandboxed_config(&temp));
        let path = write_workflow(
            &temp,
            r#"
            name: t
            jobs:
              a:
                runs-on: alpine
                needs: b
                steps:
                  - run: exit 0
              b:
                runs-on: alpine
                needs: a
                steps:
                  - run: exit 0
            "#,
        );

        let result = engine.validate(&path);
        assert!(matches!(
            result,
            Err(VermontError::CircularDependency { .. })
        ));
    }

    #[test]
    fn validate_rejects_dependency_on_unexpanded_matrix_id() {
        let temp = TempDir::new().unwrap();
        let engine = Engine::new(sandboxed_config(&temp));
        // After expansion the id "build" no longer exists; the needs
        // edge must point at an expanded id.
        let path = write_workflow(
            &temp,
            r#"
            name: t
            jobs:
              build:
                runs-on: alpine
                strategy:
                  matrix:
                    os: [a, b]
                steps:
                  - run: exit 0
              deploy:
                runs-on: alpine
                needs: build
                steps:
                  - run: exit 0
            "#,
        );

        let result = engine.validate(&path);
        assert!(matches!(
            result,
            Err(VermontError::MissingDependency { .. })
        ));
    }
}
