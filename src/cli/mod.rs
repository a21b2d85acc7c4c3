//! Command-line interface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use console::style;

use crate::config::load_config;
use crate::engine::{Engine, JobStatus, RunSummary};
use crate::error::Result;

/// Local workflow runner: execute CI-style pipelines in containers.
#[derive(Debug, Parser)]
#[command(name = "vermont", version, about)]
pub struct Cli {
    /// Path to a configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Execute a workflow.
    Run(RunArgs),

    /// Parse and validate a workflow without executing it.
    Validate(ValidateArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the workflow file.
    pub workflow: PathBuf,

    /// Override the maximum number of concurrent jobs.
    #[arg(long)]
    pub max_jobs: Option<usize>,

    /// Print the run summary as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Path to the workflow file.
    pub workflow: PathBuf,
}

/// Dispatch a parsed command line. Returns the process exit code.
pub fn dispatch(cli: &Cli) -> Result<i32> {
    let mut config = load_config(cli.config.as_deref())?;

    match &cli.command {
        Commands::Run(args) => {
            if let Some(max_jobs) = args.max_jobs {
                config.runner.max_concurrent_jobs = max_jobs;
            }

            let engine = Engine::new(config);
            let summary = engine.run(&args.workflow)?;

            if args.json {
                let rendered =
                    serde_json::to_string_pretty(&summary).map_err(anyhow::Error::from)?;
                println!("{rendered}");
            } else {
                print_summary(&summary);
            }

            Ok(if summary.success { 0 } else { 1 })
        }
        Commands::Validate(args) => {
            let engine = Engine::new(config);
            let job_count = engine.validate(&args.workflow)?;
            println!(
                "{} {} ({} job{})",
                style("valid:").green().bold(),
                args.workflow.display(),
                job_count,
                if job_count == 1 { "" } else { "s" }
            );
            Ok(0)
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!(
        "{} {}",
        style("workflow:").bold(),
        style(&summary.workflow).cyan()
    );

    for (id, state) in &summary.jobs {
        let status = match state.status {
            JobStatus::Completed => style("completed").green(),
            JobStatus::Failed => style("failed").red(),
            JobStatus::Skipped => style("skipped").yellow(),
            JobStatus::Pending | JobStatus::Ready => style("pending").dim(),
            JobStatus::Running => style("running").dim(),
        };

        let duration = state
            .result
            .as_ref()
            .map(|r| format!(" ({})", format_duration(r.duration)))
            .unwrap_or_default();

        println!("  {id}: {status}{duration}");
    }

    if let Some(failure) = &summary.first_failure {
        println!();
        println!("{} {failure}", style("error:").red().bold());
    }

    println!();
    let verdict = if summary.success {
        style("success").green().bold()
    } else {
        style("failure").red().bold()
    };
    println!(
        "{verdict} in {}",
        format_duration(summary.duration)
    );
}

fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if secs == 0 {
        format!("{millis}ms")
    } else if secs < 60 {
        format!("{secs}.{}s", millis / 100)
    } else {
        format!("{}m {}s", secs / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_command() {
        let cli = Cli::parse_from(["vermont", "run", "ci.yml"]);
        match cli.command {
            Commands::Run(args) => assert_eq!(args.workflow, PathBuf::from("ci.yml")),
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn parses_validate_command() {
        let cli = Cli::parse_from(["vermont", "validate", "ci.yml"]);
        assert!(matches!(cli.command, Commands::Validate(_)));
    }

    #[test]
    fn parses_global_flags() {
        let cli = Cli::parse_from(["vermont", "--debug", "run", "ci.yml", "--max-jobs", "4"]);
        assert!(cli.debug);
        match cli.command {
            Commands::Run(args) => assert_eq!(args.max_jobs, Some(4)),
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn format_duration_ranges() {
        use std::time::Duration;
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(2500)), "2.5s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
    }
}
