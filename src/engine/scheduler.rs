//! Dependency-aware parallel job scheduling.
//!
//! The scheduler is an event loop that owns the job-state map. Workers
//! run on their own threads and report completion over a channel, so no
//! state is shared under a lock. At most `max_concurrent` workers are
//! live at any instant.
//!
//! On the first job failure the scheduler records the failure, signals
//! cancellation (observed by workers between steps), stops launching new
//! jobs, and lets in-flight jobs drain. Jobs that never started are
//! recorded as skipped.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;

use chrono::Utc;
use tracing::{info, warn};

use crate::engine::context::job_dir_name;
use crate::engine::graph::JobGraph;
use crate::engine::state::{JobResult, JobState, JobStatus};
use crate::engine::step::StepExecutor;
use crate::error::{Result, VermontError};
use crate::workflow::Job;

/// Outcome of a scheduled run.
#[derive(Debug)]
pub struct RunReport {
    /// Final state of every job.
    pub jobs: BTreeMap<String, JobState>,

    /// Description of the first failure, when any job failed.
    pub first_failure: Option<String>,
}

impl RunReport {
    /// True iff every job completed successfully.
    pub fn success(&self) -> bool {
        self.jobs
            .values()
            .all(|state| state.status == JobStatus::Completed)
    }
}

/// Drives parallel execution of a job map.
pub struct Scheduler<'a> {
    executor: &'a StepExecutor<'a>,
    max_concurrent: usize,
}

impl<'a> Scheduler<'a> {
    /// Create a scheduler bounded by `max_concurrent` simultaneous jobs.
    pub fn new(executor: &'a StepExecutor<'a>, max_concurrent: usize) -> Self {
        Self {
            executor,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Validate the dependency graph and run every job to a terminal
    /// state. Job failures are reported through [`RunReport`]; only
    /// validation problems and deadlocks surface as errors.
    pub fn execute(&self, jobs: &HashMap<String, Job>, run_dir: &Path) -> Result<RunReport> {
        let graph = JobGraph::build(jobs)?;
        graph.ensure_acyclic()?;

        let mut states: BTreeMap<String, JobState> = jobs
            .iter()
            .map(|(id, job)| (id.clone(), JobState::new(id, job)))
            .collect();

        let cancel = AtomicBool::new(false);
        let mut first_failure: Option<String> = None;

        thread::scope(|scope| -> Result<()> {
            let (tx, rx) = mpsc::channel::<(String, JobResult)>();
            let mut running = 0usize;

            loop {
                propagate_skips(&mut states);

                if first_failure.is_none() {
                    let satisfied: HashSet<String> = states
                        .values()
                        .filter(|s| s.status == JobStatus::Completed)
                        .map(|s| s.id.clone())
                        .collect();

                    let ready: Vec<String> = states
                        .values()
                        .filter(|s| s.status == JobStatus::Pending)
                        .filter(|s| graph.is_ready(&s.id, &satisfied))
                        .map(|s| s.id.clone())
                        .collect();

                    for id in ready {
                        if running >= self.max_concurrent {
                            break;
                        }

                        let state = states.get_mut(&id).expect("ready job has state");
                        state.status = JobStatus::Running;
                        state.started_at = Some(Utc::now());

                        info!(job = %id, deps = ?graph.dependencies_of(&id), "Starting job");

                        let job = &jobs[&id];
                        let job_dir = run_dir.join(job_dir_name(&id));
                        let worker_tx = tx.clone();
                        let executor = self.executor;
                        let cancel = &cancel;

                        scope.spawn(move || {
                            let result = executor.execute_job(&id, job, job_dir, cancel);
                            let _ = worker_tx.send((id, result));
                        });

                        running += 1;
                    }
                }

                if running == 0 {
                    if states.values().all(|s| s.status.is_terminal()) {
                        break;
                    }

                    if first_failure.is_some() {
                        // Launching stopped; whatever is left never runs.
                        for state in states.values_mut() {
                            if !state.status.is_terminal() {
                                state.status = JobStatus::Skipped;
                            }
                        }
                        break;
                    }

                    let pending = states
                        .values()
                        .filter(|s| !s.status.is_terminal())
                        .count();
                    return Err(VermontError::Deadlock { pending });
                }

                let (id, result) = rx
                    .recv()
                    .map_err(|e| anyhow::anyhow!("worker channel closed: {e}"))?;
                running -= 1;

                let state = states.get_mut(&id).expect("finished job has state");
                state.finished_at = Some(Utc::now());

                if result.success {
                    state.status = JobStatus::Completed;
                    info!(job = %id, duration = ?result.duration, "Job completed");
                } else {
                    state.status = JobStatus::Failed;
                    warn!(job = %id, duration = ?result.duration, "Job failed");

                    if first_failure.is_none() {
                        first_failure = Some(describe_failure(&id, &result));
                        cancel.store(true, Ordering::Relaxed);
                    }
                }

                state.result = Some(result);
            }

            Ok(())
        })?;

        Ok(RunReport {
            jobs: states,
            first_failure,
        })
    }
}

/// Mark pending jobs whose dependencies terminally failed (or were
/// themselves skipped) as skipped, transitively.
fn propagate_skips(states: &mut BTreeMap<String, JobState>) {
    loop {
        let doomed: Vec<String> = states
            .values()
            .filter(|s| s.status == JobStatus::Pending)
            .filter(|s| {
                s.dependencies.iter().any(|dep| {
                    matches!(
                        states.get(dep).map(|d| d.status),
                        Some(JobStatus::Failed) | Some(JobStatus::Skipped)
                    )
                })
            })
            .map(|s| s.id.clone())
            .collect();

        if doomed.is_empty() {
            break;
        }

        for id in doomed {
            info!(job = %id, "Skipping job, dependency did not complete");
            if let Some(state) = states.get_mut(&id) {
                state.status = JobStatus::Skipped;
            }
        }
    }
}

/// Human-readable description of the first failing step of a job.
fn describe_failure(job_id: &str, result: &JobResult) -> String {
    match result.steps.iter().enumerate().find(|(_, s)| !s.success) {
        Some((ordinal, step)) => {
            let mut message = format!("job '{job_id}' step {} failed", ordinal + 1);
            if let Some(error) = &step.error {
                message.push_str(": ");
                message.push_str(error);
            }
            let tail = step.output_tail(5);
            if !tail.is_empty() {
                message.push('\n');
                message.push_str(&tail);
            }
            message
        }
        None => format!("job '{job_id}' failed"),
    }
}
