//! End-to-end workflow execution against a stand-in container engine.
//!
//! The fake engine is a shell script that understands the flag subset
//! the real driver emits (`--rm`, `--name`, `--workdir`, `--network`,
//! `-v`, `-e`) and executes the step command on the host, mapping
//! container paths back through the bind mounts. This keeps the suite
//! hermetic: no container engine or network access is needed.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use vermont::config::{Config, StorageConfig};
use vermont::engine::{Engine, JobStatus};

const FAKE_ENGINE: &str = r#"#!/usr/bin/env bash
# Stand-in container engine for the test suite.
set -u
cmd="$1"; shift
case "$cmd" in
  run) ;;
  *) exit 0 ;;
esac

workdir=/
mounts=()
envs=()
while [ $# -gt 0 ]; do
  case "$1" in
    --rm) shift ;;
    --name|--network) shift 2 ;;
    --workdir) workdir="$2"; shift 2 ;;
    --entrypoint) shift 2 ;;
    -v) mounts+=("$2"); shift 2 ;;
    -e) envs+=("$2"); shift 2 ;;
    *) break ;;
  esac
done

image="$1"; shift

rewrite() {
  local value="$1"
  for m in "${mounts[@]+"${mounts[@]}"}"; do
    local host="${m%%:*}"
    local rest="${m#*:}"
    local cpath="${rest%%:*}"
    value="${value//$cpath/$host}"
  done
  printf '%s' "$value"
}

cd "$(rewrite "$workdir")" 2>/dev/null || cd /

for e in "${envs[@]+"${envs[@]}"}"; do
  key="${e%%=*}"
  export "$key=$(rewrite "${e#*=}")"
done

if [ $# -ge 3 ] && [ "$2" = "-c" ]; then
  exec "$1" -c "$(rewrite "$3")"
fi
exec "$@"
"#;

struct Sandbox {
    temp: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();

        let fake = temp.path().join("fake-engine");
        std::fs::write(&fake, FAKE_ENGINE).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        Self { temp }
    }

    fn config(&self) -> Config {
        let mut config = Config::default();
        config.storage = StorageConfig::for_data_dir(&self.temp.path().join("data"));
        config.runner.work_dir = self.temp.path().join("work");
        config.container.runtime = self.temp.path().join("fake-engine").display().to_string();
        config
    }

    fn engine(&self) -> Engine {
        Engine::new(self.config())
    }

    fn engine_with(&self, tweak: impl FnOnce(&mut Config)) -> Engine {
        let mut config = self.config();
        tweak(&mut config);
        Engine::new(config)
    }

    fn write_workflow(&self, yaml: &str) -> PathBuf {
        let path = self.temp.path().join("workflow.yml");
        std::fs::write(&path, yaml).unwrap();
        path
    }

    fn path(&self) -> &Path {
        self.temp.path()
    }
}

#[test]
fn hello_world_single_step() {
    let sandbox = Sandbox::new();
    let workflow = sandbox.write_workflow(
        r#"
        name: hello
        on: workflow_dispatch
        jobs:
          hello:
            runs-on: ubuntu-latest
            steps:
              - run: echo "Hello, World!"
        "#,
    );

    let summary = sandbox.engine().run(&workflow).unwrap();

    assert!(summary.success);
    let state = &summary.jobs["hello"];
    assert_eq!(state.status, JobStatus::Completed);

    let result = state.result.as_ref().unwrap();
    assert!(result.steps[0].output.contains("Hello, World!"));
    assert!(result.duration > std::time::Duration::ZERO);
}

#[test]
fn matrix_two_by_two_produces_all_combinations() {
    let sandbox = Sandbox::new();
    let workflow = sandbox.write_workflow(
        r#"
        name: grid
        jobs:
          build:
            runs-on: ubuntu-latest
            strategy:
              matrix:
                os: [ubuntu, alpine]
                version: [1, 2]
            steps:
              - run: echo "${{ matrix.os }}-${{ matrix.version }}"
        "#,
    );

    let summary = sandbox.engine().run(&workflow).unwrap();

    assert!(summary.success);
    assert_eq!(summary.jobs.len(), 4);

    let outputs: HashSet<String> = summary
        .jobs
        .values()
        .map(|state| {
            state.result.as_ref().unwrap().steps[0]
                .output
                .trim()
                .to_string()
        })
        .collect();

    let expected: HashSet<String> = ["ubuntu-1", "ubuntu-2", "alpine-1", "alpine-2"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(outputs, expected);
}

#[test]
fn diamond_dependency_ordering() {
    let sandbox = Sandbox::new();
    let log = sandbox.path().join("order.log");

    let engine = sandbox.engine_with(|config| {
        config
            .env
            .insert("TEST_LOG".to_string(), log.display().to_string());
    });

    let workflow = sandbox.write_workflow(
        r#"
        name: diamond
        jobs:
          setup:
            runs-on: ubuntu-latest
            steps:
              - run: echo setup >> "$TEST_LOG"
          test-a:
            runs-on: ubuntu-latest
            needs: setup
            steps:
              - run: echo test-a >> "$TEST_LOG"
          test-b:
            runs-on: ubuntu-latest
            needs: setup
            steps:
              - run: echo test-b >> "$TEST_LOG"
          deploy:
            runs-on: ubuntu-latest
            needs: [test-a, test-b]
            steps:
              - run: echo deploy >> "$TEST_LOG"
        "#,
    );

    let summary = engine.run(&workflow).unwrap();
    assert!(summary.success);

    let content = std::fs::read_to_string(&log).unwrap();
    let lines: Vec<&str> = content.lines().collect();

    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "setup");
    assert_eq!(lines[3], "deploy");

    // Both tests finish after setup and before deploy.
    let setup_end = summary.jobs["setup"].finished_at.unwrap();
    let deploy_start = summary.jobs["deploy"].started_at.unwrap();
    for test in ["test-a", "test-b"] {
        let state = &summary.jobs[test];
        assert!(setup_end <= state.started_at.unwrap());
        assert!(state.finished_at.unwrap() <= deploy_start);
    }
}

#[test]
fn failure_short_circuits_dependents_only() {
    let sandbox = Sandbox::new();
    let log = sandbox.path().join("events.log");

    let engine = sandbox.engine_with(|config| {
        config
            .env
            .insert("TEST_LOG".to_string(), log.display().to_string());
    });

    let workflow = sandbox.write_workflow(
        r#"
        name: doomed
        jobs:
          a:
            runs-on: ubuntu-latest
            steps:
              - run: exit 1
          b:
            runs-on: ubuntu-latest
            needs: a
            steps:
              - run: echo should-not-run >> "$TEST_LOG"
          c:
            runs-on: ubuntu-latest
            steps:
              - run: echo c >> "$TEST_LOG"
        "#,
    );

    let summary = engine.run(&workflow).unwrap();

    assert!(!summary.success);
    assert_eq!(summary.jobs["a"].status, JobStatus::Failed);
    assert_eq!(summary.jobs["b"].status, JobStatus::Skipped);
    assert_eq!(summary.jobs["c"].status, JobStatus::Completed);

    let content = std::fs::read_to_string(&log).unwrap_or_default();
    assert!(content.contains('c'));
    assert!(!content.contains("should-not-run"));

    let failure = summary.first_failure.unwrap();
    assert!(failure.contains("'a'"));
}

#[test]
fn step_outputs_flow_between_steps() {
    let sandbox = Sandbox::new();
    let workflow = sandbox.write_workflow(
        r#"
        name: outputs
        jobs:
          pipeline:
            runs-on: ubuntu-latest
            steps:
              - id: set
                run: echo "answer=42" >> "$GITHUB_OUTPUT"
              - id: read
                run: echo "value=${{ steps.set.outputs.answer }}"
        "#,
    );

    let summary = sandbox.engine().run(&workflow).unwrap();
    assert!(summary.success);

    let result = summary.jobs["pipeline"].result.as_ref().unwrap();
    assert!(result.steps[1].output.contains("value=42"));
    assert_eq!(result.steps[0].outputs["answer"], "42");
}

#[test]
fn composite_action_receives_inputs() {
    let sandbox = Sandbox::new();

    let action_dir = sandbox.path().join("actions/greet");
    std::fs::create_dir_all(&action_dir).unwrap();
    std::fs::write(
        action_dir.join("action.yml"),
        r#"
name: Greet
description: Say hi
inputs:
  name:
    description: Who to greet
    required: true
runs:
  using: composite
  steps:
    - run: echo "Hi, ${{ inputs.name }}"
      shell: bash
"#,
    )
    .unwrap();

    let workflow = sandbox.write_workflow(&format!(
        r#"
        name: greeter
        jobs:
          greet:
            runs-on: ubuntu-latest
            steps:
              - uses: {}
                with:
                  name: Vermont
        "#,
        action_dir.display()
    ));

    let summary = sandbox.engine().run(&workflow).unwrap();

    assert!(summary.success);
    let result = summary.jobs["greet"].result.as_ref().unwrap();
    assert!(result.steps[0].output.contains("Hi, Vermont"));
}

#[test]
fn composite_action_missing_required_input_fails() {
    let sandbox = Sandbox::new();

    let action_dir = sandbox.path().join("actions/greet");
    std::fs::create_dir_all(&action_dir).unwrap();
    std::fs::write(
        action_dir.join("action.yml"),
        r#"
name: Greet
inputs:
  name:
    required: true
runs:
  using: composite
  steps:
    - run: echo "Hi, ${{ inputs.name }}"
      shell: bash
"#,
    )
    .unwrap();

    let workflow = sandbox.write_workflow(&format!(
        r#"
        name: greeter
        jobs:
          greet:
            runs-on: ubuntu-latest
            steps:
              - uses: {}
        "#,
        action_dir.display()
    ));

    let summary = sandbox.engine().run(&workflow).unwrap();

    assert!(!summary.success);
    assert_eq!(summary.jobs["greet"].status, JobStatus::Failed);

    let failure = summary.first_failure.unwrap();
    assert!(failure.contains("Required input 'name'"));
}

#[test]
fn runner_context_expressions_resolve() {
    let sandbox = Sandbox::new();
    let workflow = sandbox.write_workflow(
        r#"
        name: contexts
        jobs:
          probe:
            runs-on: ubuntu-latest
            steps:
              - run: echo "os=${{ runner.os }} ref=${{ github.ref }} gone=${{ secrets.TOKEN }}"
        "#,
    );

    let summary = sandbox.engine().run(&workflow).unwrap();
    assert!(summary.success);

    let output = &summary.jobs["probe"].result.as_ref().unwrap().steps[0].output;
    assert!(output.contains("os=Linux"));
    assert!(output.contains("ref=refs/heads/"));
    assert!(output.contains("gone="));
}

#[test]
fn continue_on_error_keeps_the_job_green() {
    let sandbox = Sandbox::new();
    let workflow = sandbox.write_workflow(
        r#"
        name: tolerant
        jobs:
          lenient:
            runs-on: ubuntu-latest
            steps:
              - run: exit 3
                continue-on-error: true
              - run: echo survived
        "#,
    );

    let summary = sandbox.engine().run(&workflow).unwrap();

    assert!(summary.success);
    let result = summary.jobs["lenient"].result.as_ref().unwrap();
    assert_eq!(result.steps.len(), 2);
    assert!(!result.steps[0].success);
    assert!(result.steps[1].output.contains("survived"));
}

#[test]
fn per_run_workspace_is_removed() {
    let sandbox = Sandbox::new();
    let workflow = sandbox.write_workflow(
        r#"
        name: tidy
        jobs:
          touch:
            runs-on: ubuntu-latest
            steps:
              - run: echo scratch > scratch.txt
        "#,
    );

    let engine = sandbox.engine();
    let summary = engine.run(&workflow).unwrap();
    assert!(summary.success);

    let leftovers: Vec<_> = std::fs::read_dir(sandbox.path().join("work"))
        .unwrap()
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn env_sidecar_exports_reach_later_steps() {
    let sandbox = Sandbox::new();
    let workflow = sandbox.write_workflow(
        r#"
        name: exports
        jobs:
          chain:
            runs-on: ubuntu-latest
            steps:
              - run: echo "STAGE=first" >> "$GITHUB_ENV"
              - run: echo "stage is $STAGE"
        "#,
    );

    let summary = sandbox.engine().run(&workflow).unwrap();
    assert!(summary.success);

    let result = summary.jobs["chain"].result.as_ref().unwrap();
    assert!(result.steps[1].output.contains("stage is first"));
}
