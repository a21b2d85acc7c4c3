//! Step execution.
//!
//! A step is either a shell command run in the job's container, or an
//! action invocation. Actions dispatch on their declared runtime:
//! composite actions execute their sub-steps (recursively, with a depth
//! bound), JS-runtime actions run `node` against the action entrypoint,
//! and Docker-runtime actions run their own image.
//!
//! Steps communicate through sidecar files inside the job workspace:
//! `github_output.txt` (`GITHUB_OUTPUT`) collects `KEY=VALUE` output
//! records, `github_env.txt` (`GITHUB_ENV`) collects environment
//! exports visible to subsequent steps.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::actions::{ActionResolver, ActionRuntime, ResolvedAction};
use crate::container::{ContainerEngine, ContainerRun, Mount};
use crate::engine::state::{JobResult, StepOutcome};
use crate::error::{Result, VermontError};
use crate::expr::{self, ExprContext};
use crate::workflow::{Job, Step};

/// Nested action invocations beyond this depth fail the step.
pub const MAX_ACTION_DEPTH: usize = 10;

const OUTPUT_SIDECAR: &str = "github_output.txt";
const ENV_SIDECAR: &str = "github_env.txt";
const SUMMARY_SIDECAR: &str = "github_step_summary.txt";

/// Executes the steps of a single job.
pub struct StepExecutor<'a> {
    /// Container engine driver.
    pub container: &'a ContainerEngine,

    /// Action resolver.
    pub resolver: &'a ActionResolver,

    /// Configured environment overlay (lowest precedence).
    pub config_env: HashMap<String, String>,

    /// Workflow-level environment.
    pub workflow_env: HashMap<String, String>,

    /// `github.*` properties for substitution and `GITHUB_*` defaults.
    pub github: HashMap<String, String>,

    /// Base directory for `./` action references.
    pub local_action_root: PathBuf,
}

/// Mutable per-job execution state.
pub struct JobContext {
    pub job_id: String,
    pub image: String,
    pub job_dir: PathBuf,
    pub job_env: HashMap<String, String>,

    /// Environment exported by earlier steps via `GITHUB_ENV`.
    exported_env: HashMap<String, String>,

    /// Step id -> output name -> value.
    step_outputs: HashMap<String, HashMap<String, String>>,

    /// Monotonic counter for container names.
    seq: usize,
}

impl JobContext {
    fn container_name(&mut self) -> String {
        self.seq += 1;
        let slug: String = self
            .job_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        format!("vermont-{}-{}", slug.trim_matches('-'), self.seq)
    }
}

impl<'a> StepExecutor<'a> {
    /// Execute every step of a job in declaration order.
    ///
    /// Step failures are captured in the returned [`JobResult`] rather
    /// than propagated; a failing step stops the job unless it carries
    /// `continue-on-error`. The cancel flag is observed between steps.
    pub fn execute_job(
        &self,
        job_id: &str,
        job: &Job,
        job_dir: PathBuf,
        cancel: &AtomicBool,
    ) -> JobResult {
        let start = Instant::now();
        let mut steps: Vec<StepOutcome> = Vec::new();
        let mut outputs: HashMap<String, String> = HashMap::new();
        let mut success = true;

        let mut ctx = JobContext {
            job_id: job_id.to_string(),
            image: self.container.image_for(&job.runs_on),
            job_dir,
            job_env: job.env.clone(),
            exported_env: HashMap::new(),
            step_outputs: HashMap::new(),
            seq: 0,
        };

        if let Err(e) = self.prepare_workspace(&ctx) {
            steps.push(StepOutcome::failure(
                "prepare workspace",
                String::new(),
                e.to_string(),
                start.elapsed(),
            ));
            return JobResult {
                success: false,
                steps,
                outputs,
                duration: start.elapsed(),
            };
        }

        if let Err(e) = self.container.ensure_image(&ctx.image) {
            steps.push(StepOutcome::failure(
                "pull image",
                String::new(),
                e.to_string(),
                start.elapsed(),
            ));
            return JobResult {
                success: false,
                steps,
                outputs,
                duration: start.elapsed(),
            };
        }

        for (ordinal, step) in job.steps.iter().enumerate() {
            // A launched job always runs its first step; cancellation is
            // observed between steps.
            if ordinal > 0 && cancel.load(Ordering::Relaxed) {
                info!(job = job_id, "Run cancelled, abandoning remaining steps");
                success = false;
                steps.push(StepOutcome::failure(
                    step.label(),
                    String::new(),
                    "run cancelled".to_string(),
                    std::time::Duration::ZERO,
                ));
                break;
            }

            info!(job = job_id, step = ordinal + 1, label = step.label(), "Starting step");

            let step_start = Instant::now();
            let outcome = match self.execute_step(&mut ctx, step, ordinal) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(job = job_id, step = ordinal + 1, error = %e, "Step errored");
                    StepOutcome::failure(
                        step.label(),
                        String::new(),
                        e.to_string(),
                        step_start.elapsed(),
                    )
                }
            };

            outputs.extend(outcome.outputs.clone());

            if !outcome.success {
                if step.continue_on_error {
                    warn!(
                        job = job_id,
                        step = ordinal + 1,
                        "Step failed but continue-on-error is set"
                    );
                    steps.push(outcome);
                    continue;
                }
                steps.push(outcome);
                success = false;
                break;
            }

            steps.push(outcome);
        }

        JobResult {
            success,
            steps,
            outputs,
            duration: start.elapsed(),
        }
    }

    /// Execute a single step: shell-in-container or action dispatch.
    pub fn execute_step(
        &self,
        ctx: &mut JobContext,
        step: &Step,
        ordinal: usize,
    ) -> Result<StepOutcome> {
        match (&step.run, &step.uses) {
            (Some(_), _) => self.run_shell_step(ctx, step, ordinal),
            (_, Some(_)) => self.run_action_step(ctx, step, ordinal),
            (None, None) => Err(VermontError::StepFailed {
                job: ctx.job_id.clone(),
                step: ordinal + 1,
                code: None,
            }),
        }
    }

    fn prepare_workspace(&self, ctx: &JobContext) -> Result<()> {
        std::fs::create_dir_all(&ctx.job_dir)?;
        for sidecar in [OUTPUT_SIDECAR, ENV_SIDECAR, SUMMARY_SIDECAR] {
            let path = ctx.job_dir.join(sidecar);
            if !path.exists() {
                std::fs::write(&path, "")?;
            }
        }
        Ok(())
    }

    /// Merge the effective environment for a step, in order of
    /// increasing precedence: config overlay, workflow env, job env,
    /// `GITHUB_ENV` exports, GitHub-compatible defaults (only where not
    /// already set), step env.
    fn effective_env(&self, ctx: &JobContext, step_env: &HashMap<String, String>) -> HashMap<String, String> {
        let mut env = self.config_env.clone();
        env.extend(self.workflow_env.clone());
        env.extend(ctx.job_env.clone());
        env.extend(ctx.exported_env.clone());

        self.insert_github_defaults(&mut env, &ctx.job_id);
        env.extend(step_env.clone());

        env
    }

    fn insert_github_defaults(&self, env: &mut HashMap<String, String>, job_id: &str) {
        let github = |prop: &str, fallback: &str| -> String {
            self.github
                .get(prop)
                .cloned()
                .unwrap_or_else(|| fallback.to_string())
        };

        let defaults = [
            ("GITHUB_WORKFLOW", job_id.to_string()),
            ("GITHUB_JOB", job_id.to_string()),
            ("GITHUB_ACTOR", github("actor", "vermont-runner")),
            ("GITHUB_REPOSITORY", github("repository", "owner/repo")),
            ("GITHUB_EVENT_NAME", github("event_name", "workflow_dispatch")),
            (
                "GITHUB_SHA",
                github("sha", "0000000000000000000000000000000000000000"),
            ),
            ("GITHUB_REF", github("ref", "refs/heads/main")),
            ("GITHUB_WORKSPACE", "/workspace".to_string()),
            ("GITHUB_OUTPUT", format!("/workspace/{OUTPUT_SIDECAR}")),
            ("GITHUB_ENV", format!("/workspace/{ENV_SIDECAR}")),
            (
                "GITHUB_STEP_SUMMARY",
                format!("/workspace/{SUMMARY_SIDECAR}"),
            ),
            ("RUNNER_OS", "Linux".to_string()),
            ("RUNNER_ARCH", "X64".to_string()),
            ("RUNNER_NAME", "Vermont Runner".to_string()),
            ("RUNNER_TEMP", "/tmp".to_string()),
            ("RUNNER_TOOL_CACHE", "/opt/hostedtoolcache".to_string()),
        ];

        for (key, value) in defaults {
            env.entry(key.to_string()).or_insert(value);
        }
    }

    /// Expression context for the current point in the job.
    fn expr_context(&self, ctx: &JobContext, env: &HashMap<String, String>) -> ExprContext {
        let mut expr_ctx = ExprContext::new()
            .with_env(env.clone())
            .with_github(self.github.clone())
            .with_workspace(&ctx.job_dir);
        expr_ctx.step_outputs = ctx.step_outputs.clone();
        expr_ctx
    }

    // ---- shell steps -------------------------------------------------

    fn run_shell_step(
        &self,
        ctx: &mut JobContext,
        step: &Step,
        ordinal: usize,
    ) -> Result<StepOutcome> {
        let run = step.run.as_deref().expect("shell step has run text");

        let merged = self.effective_env(ctx, &step.env);
        let expr_ctx = self.expr_context(ctx, &merged);

        let env: HashMap<String, String> = merged
            .iter()
            .map(|(k, v)| (k.clone(), expr::substitute(v, &expr_ctx)))
            .collect();

        let script = expr::substitute(run, &expr_ctx);
        let shell = step
            .shell
            .clone()
            .unwrap_or_else(|| ContainerEngine::shell_for_image(&ctx.image).to_string());

        let workdir = match &step.working_directory {
            Some(wd) if wd.starts_with('/') => wd.clone(),
            Some(wd) => format!("/workspace/{wd}"),
            None => "/workspace".to_string(),
        };

        let spec = ContainerRun {
            image: ctx.image.clone(),
            name: ctx.container_name(),
            workdir,
            mounts: vec![Mount::rw(&ctx.job_dir, "/workspace")],
            env,
            entrypoint: None,
            command: vec![shell, "-c".to_string(), script],
        };

        let job_id = ctx.job_id.clone();
        let result = self
            .container
            .run(&spec, &mut |line| info!(job = %job_id, "{line}"))?;

        let mut outcome = if result.success {
            StepOutcome::success(step.label(), result.output, result.duration)
        } else {
            StepOutcome::failure(
                step.label(),
                result.output,
                format!("exit code {:?}", result.exit_code),
                result.duration,
            )
        };

        outcome.outputs = self.collect_step_outputs(ctx, step);
        self.absorb_env_exports(ctx);

        if !outcome.success {
            warn!(
                job = %ctx.job_id,
                step = ordinal + 1,
                tail = %outcome.output_tail(5),
                "Step failed"
            );
        }

        Ok(outcome)
    }

    /// Drain the output sidecar, recording under the step id if present.
    fn collect_step_outputs(&self, ctx: &mut JobContext, step: &Step) -> HashMap<String, String> {
        let outputs = take_records(&ctx.job_dir.join(OUTPUT_SIDECAR));
        if let Some(id) = &step.id {
            ctx.step_outputs.insert(id.clone(), outputs.clone());
        }
        outputs
    }

    /// Merge `GITHUB_ENV` exports for subsequent steps.
    fn absorb_env_exports(&self, ctx: &mut JobContext) {
        let exports = read_records(&ctx.job_dir.join(ENV_SIDECAR));
        ctx.exported_env.extend(exports);
    }

    // ---- action steps ------------------------------------------------

    fn run_action_step(
        &self,
        ctx: &mut JobContext,
        step: &Step,
        ordinal: usize,
    ) -> Result<StepOutcome> {
        let uses = step.uses.as_deref().expect("action step has uses");

        let merged = self.effective_env(ctx, &step.env);
        let expr_ctx = self.expr_context(ctx, &merged);

        let env: HashMap<String, String> = merged
            .iter()
            .map(|(k, v)| (k.clone(), expr::substitute(v, &expr_ctx)))
            .collect();

        let reference = expr::substitute(uses, &expr_ctx);

        let provided: HashMap<String, String> = step
            .with
            .iter()
            .map(|(name, value)| {
                let text = match value.as_str() {
                    Some(s) => expr::substitute(s, &expr_ctx),
                    None => value.to_string(),
                };
                (name.clone(), text)
            })
            .collect();

        let start = Instant::now();
        let chain = vec![reference.clone()];
        let (output, outputs) = match self.run_action(ctx, &env, &reference, provided, &chain) {
            Ok(result) => result,
            Err(e) => {
                warn!(job = %ctx.job_id, step = ordinal + 1, action = %reference, error = %e, "Action failed");
                return Ok(StepOutcome::failure(
                    step.label(),
                    String::new(),
                    e.to_string(),
                    start.elapsed(),
                ));
            }
        };

        let mut outcome = StepOutcome::success(step.label(), output, start.elapsed());
        if let Some(id) = &step.id {
            ctx.step_outputs.insert(id.clone(), outputs.clone());
        }
        outcome.outputs = outputs;
        self.absorb_env_exports(ctx);

        Ok(outcome)
    }

    /// Resolve and execute an action invocation. `chain` records the
    /// reference path for recursion-limit errors.
    fn run_action(
        &self,
        ctx: &mut JobContext,
        base_env: &HashMap<String, String>,
        reference: &str,
        provided: HashMap<String, String>,
        chain: &[String],
    ) -> Result<(String, HashMap<String, String>)> {
        if chain.len() > MAX_ACTION_DEPTH {
            return Err(VermontError::ActionRecursionLimit {
                chain: chain.join(" -> "),
            });
        }

        let resolved = self.resolver.resolve(reference, &self.local_action_root)?;
        let runtime = resolved.metadata.runtime()?;

        let inputs = self.resolve_inputs(&resolved, provided, base_env)?;

        let mut env = base_env.clone();
        for (name, value) in &inputs {
            env.insert(input_env_name(name), value.clone());
        }
        env.insert("GITHUB_ACTION".to_string(), reference.to_string());
        env.insert("GITHUB_ACTION_PATH".to_string(), "/action".to_string());
        env.extend(resolved.metadata.runs.env.clone());

        match runtime {
            ActionRuntime::Composite => self.run_composite(ctx, &resolved, env, inputs, chain),
            ActionRuntime::Node => self.run_node(ctx, &resolved, env),
            ActionRuntime::Docker => self.run_docker(ctx, &resolved, env),
        }
    }

    /// Effective input values: the caller's `with` value, else the
    /// declared default, else empty. Required inputs without a value are
    /// an error. Undeclared `with` entries are passed through.
    fn resolve_inputs(
        &self,
        resolved: &ResolvedAction,
        provided: HashMap<String, String>,
        env: &HashMap<String, String>,
    ) -> Result<HashMap<String, String>> {
        let mut inputs = HashMap::new();

        let default_ctx = ExprContext::new()
            .with_env(env.clone())
            .with_github(self.github.clone());

        for (name, declared) in &resolved.metadata.inputs {
            let value = match provided.get(name) {
                Some(value) => value.clone(),
                None => match &declared.default {
                    Some(default) => expr::substitute(default, &default_ctx),
                    None if declared.required => {
                        return Err(VermontError::InputValidation {
                            action: resolved.reference.clone(),
                            input: name.clone(),
                        });
                    }
                    None => String::new(),
                },
            };
            inputs.insert(name.clone(), value);
        }

        for (name, value) in provided {
            inputs.entry(name).or_insert(value);
        }

        Ok(inputs)
    }

    /// Execute a composite action's sub-steps in order.
    fn run_composite(
        &self,
        ctx: &mut JobContext,
        resolved: &ResolvedAction,
        env: HashMap<String, String>,
        inputs: HashMap<String, String>,
        chain: &[String],
    ) -> Result<(String, HashMap<String, String>)> {
        if resolved.metadata.runs.steps.is_empty() {
            return Err(VermontError::ActionMetadataInvalid {
                path: resolved.path.clone(),
                message: "composite action has no steps".to_string(),
            });
        }

        let mut combined = String::new();
        let mut local_outputs: HashMap<String, HashMap<String, String>> = HashMap::new();

        for (ordinal, sub) in resolved.metadata.runs.steps.iter().enumerate() {
            let mut sub_ctx = ExprContext::new()
                .with_env(env.clone())
                .with_github(self.github.clone())
                .with_inputs(inputs.clone())
                .with_workspace(&ctx.job_dir);
            sub_ctx.step_outputs = local_outputs.clone();

            let mut sub_env = env.clone();
            for (key, value) in &sub.env {
                sub_env.insert(key.clone(), expr::substitute(value, &sub_ctx));
            }

            if let Some(run) = &sub.run {
                let script = expr::substitute(run, &sub_ctx);
                let shell = sub
                    .shell
                    .clone()
                    .unwrap_or_else(|| ContainerEngine::shell_for_image(&ctx.image).to_string());

                let spec = ContainerRun {
                    image: ctx.image.clone(),
                    name: ctx.container_name(),
                    workdir: "/action".to_string(),
                    mounts: vec![
                        Mount::rw(&ctx.job_dir, "/workspace"),
                        Mount::ro(&resolved.path, "/action"),
                    ],
                    env: sub_env,
                    entrypoint: None,
                    command: vec![shell, "-c".to_string(), script],
                };

                let job_id = ctx.job_id.clone();
                let result = self
                    .container
                    .run(&spec, &mut |line| info!(job = %job_id, "{line}"))?;

                combined.push_str(&result.output);

                if !result.success {
                    return Err(VermontError::StepFailed {
                        job: ctx.job_id.clone(),
                        step: ordinal + 1,
                        code: result.exit_code,
                    });
                }

                if let Some(id) = &sub.id {
                    let outputs = take_records(&ctx.job_dir.join(OUTPUT_SIDECAR));
                    local_outputs.insert(id.clone(), outputs);
                }
            } else if let Some(sub_uses) = &sub.uses {
                let nested_ref = expr::substitute(sub_uses, &sub_ctx);

                let nested_inputs: HashMap<String, String> = sub
                    .with
                    .iter()
                    .map(|(name, value)| {
                        let text = match value.as_str() {
                            Some(s) => expr::substitute(s, &sub_ctx),
                            None => value.to_string(),
                        };
                        (name.clone(), text)
                    })
                    .collect();

                let mut nested_chain = chain.to_vec();
                nested_chain.push(nested_ref.clone());

                let (nested_output, nested_outputs) =
                    self.run_action(ctx, &env, &nested_ref, nested_inputs, &nested_chain)?;

                combined.push_str(&nested_output);
                if let Some(id) = &sub.id {
                    local_outputs.insert(id.clone(), nested_outputs);
                }
            }
        }

        // Everything consumed per-sub-step plus whatever the final steps
        // left in the sidecar belongs to the enclosing step.
        let mut outputs: HashMap<String, String> = HashMap::new();
        for map in local_outputs.into_values() {
            outputs.extend(map);
        }
        outputs.extend(take_records(&ctx.job_dir.join(OUTPUT_SIDECAR)));

        Ok((combined, outputs))
    }

    /// Execute a JS-runtime action: copy the read-only action tree to a
    /// writable location, install production dependencies when needed,
    /// and run the entrypoint with the workspace as working directory.
    fn run_node(
        &self,
        ctx: &mut JobContext,
        resolved: &ResolvedAction,
        env: HashMap<String, String>,
    ) -> Result<(String, HashMap<String, String>)> {
        let main = resolved.metadata.runs.main.as_deref().unwrap_or("index.js");

        let script = format!(
            concat!(
                "set -e\n",
                "rm -rf /tmp/vermont-action\n",
                "cp -r /action /tmp/vermont-action\n",
                "if [ -f /tmp/vermont-action/package.json ] && [ ! -d /tmp/vermont-action/node_modules ]; then\n",
                "  (cd /tmp/vermont-action && npm install --production) || echo 'warning: npm install failed, continuing'\n",
                "fi\n",
                "cd /workspace\n",
                "exec node /tmp/vermont-action/{}\n",
            ),
            main
        );

        let spec = ContainerRun {
            image: ctx.image.clone(),
            name: ctx.container_name(),
            workdir: "/workspace".to_string(),
            mounts: vec![
                Mount::rw(&ctx.job_dir, "/workspace"),
                Mount::ro(&resolved.path, "/action"),
            ],
            env,
            entrypoint: None,
            command: vec![
                ContainerEngine::shell_for_image(&ctx.image).to_string(),
                "-c".to_string(),
                script,
            ],
        };

        let job_id = ctx.job_id.clone();
        let result = self
            .container
            .run(&spec, &mut |line| info!(job = %job_id, "{line}"))?;

        if !result.success {
            return Err(VermontError::StepFailed {
                job: ctx.job_id.clone(),
                step: 1,
                code: result.exit_code,
            });
        }

        let outputs = take_records(&ctx.job_dir.join(OUTPUT_SIDECAR));
        Ok((result.output, outputs))
    }

    /// Execute a Docker-runtime action: pull `docker://` images, build
    /// anything else from the action tree, then run with the workspace
    /// mounted at `/github/workspace`.
    fn run_docker(
        &self,
        ctx: &mut JobContext,
        resolved: &ResolvedAction,
        mut env: HashMap<String, String>,
    ) -> Result<(String, HashMap<String, String>)> {
        let image_field = resolved.metadata.runs.image.as_deref().ok_or_else(|| {
            VermontError::ActionMetadataInvalid {
                path: resolved.path.clone(),
                message: "runs.image is required for the docker runtime".to_string(),
            }
        })?;

        let image = match image_field.strip_prefix("docker://") {
            Some(image) => {
                self.container.ensure_image(image)?;
                image.to_string()
            }
            None => {
                let digest = Sha256::digest(resolved.reference.as_bytes());
                let tag = format!("vermont-action-{}", hex::encode(&digest[..6]));
                self.container.build_image(&resolved.path, &tag)?;
                tag
            }
        };

        env.insert(
            "GITHUB_WORKSPACE".to_string(),
            "/github/workspace".to_string(),
        );
        env.insert(
            "GITHUB_OUTPUT".to_string(),
            format!("/github/workspace/{OUTPUT_SIDECAR}"),
        );
        env.insert(
            "GITHUB_ENV".to_string(),
            format!("/github/workspace/{ENV_SIDECAR}"),
        );

        let spec = ContainerRun {
            image,
            name: ctx.container_name(),
            workdir: "/github/workspace".to_string(),
            mounts: vec![Mount::rw(&ctx.job_dir, "/github/workspace")],
            env,
            entrypoint: resolved.metadata.runs.entrypoint.clone(),
            command: resolved.metadata.runs.args.clone(),
        };

        let job_id = ctx.job_id.clone();
        let result = self
            .container
            .run(&spec, &mut |line| info!(job = %job_id, "{line}"))?;

        if !result.success {
            return Err(VermontError::StepFailed {
                job: ctx.job_id.clone(),
                step: 1,
                code: result.exit_code,
            });
        }

        let outputs = take_records(&ctx.job_dir.join(OUTPUT_SIDECAR));
        Ok((result.output, outputs))
    }
}

/// Environment variable name for an action input: `INPUT_` plus the
/// upper-cased name with dashes as underscores.
fn input_env_name(input: &str) -> String {
    format!("INPUT_{}", input.to_uppercase().replace('-', "_"))
}

/// Parse a sidecar file of newline-delimited `KEY=VALUE` records.
/// Lines without `=` are ignored; keys are case-sensitive.
fn read_records(path: &Path) -> HashMap<String, String> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return HashMap::new();
    };

    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            line.split_once('=')
                .map(|(key, value)| (key.to_string(), value.to_string()))
        })
        .collect()
}

/// Parse a sidecar file and truncate it so the next step starts clean.
fn take_records(path: &Path) -> HashMap<String, String> {
    let records = read_records(path);
    if !records.is_empty() {
        let _ = std::fs::write(path, "");
    }
    records
}
