//! Job context assembly: GitHub-compatible environment and repository
//! probing.

use std::collections::HashMap;
use std::path::Path;
use std::process::Command;

use tracing::debug;

/// `github.<property>` names and their corresponding environment
/// variables.
pub const GITHUB_PROPERTY_VARS: &[(&str, &str)] = &[
    ("repository", "GITHUB_REPOSITORY"),
    ("sha", "GITHUB_SHA"),
    ("ref", "GITHUB_REF"),
    ("actor", "GITHUB_ACTOR"),
    ("event_name", "GITHUB_EVENT_NAME"),
    ("token", "GITHUB_TOKEN"),
    ("workspace", "GITHUB_WORKSPACE"),
];

/// Assemble the `github.*` property map consulted by the substituter and
/// exported to steps.
///
/// Precedence: configured environment values win, then values probed
/// from the repository the runner was invoked in; anything still missing
/// falls back to the documented defaults at lookup time.
pub fn github_properties(
    config_env: &HashMap<String, String>,
    probe_dir: Option<&Path>,
) -> HashMap<String, String> {
    let mut properties = match probe_dir {
        Some(dir) => probe_repository(dir),
        None => HashMap::new(),
    };

    for (property, var) in GITHUB_PROPERTY_VARS {
        if let Some(value) = config_env.get(*var) {
            properties.insert((*property).to_string(), value.clone());
        }
    }

    properties
}

/// Probe a directory's version-control state for `sha`, `ref`, and
/// `repository`. Probing is best-effort; failures simply leave the
/// property unset.
pub fn probe_repository(dir: &Path) -> HashMap<String, String> {
    let mut properties = HashMap::new();

    if let Some(sha) = git_stdout(dir, &["rev-parse", "HEAD"]) {
        properties.insert("sha".to_string(), sha);
    }

    if let Some(branch) = git_stdout(dir, &["rev-parse", "--abbrev-ref", "HEAD"]) {
        if !branch.is_empty() && branch != "HEAD" {
            properties.insert("ref".to_string(), format!("refs/heads/{branch}"));
        }
    }

    if let Some(remote) = git_stdout(dir, &["config", "--get", "remote.origin.url"]) {
        if let Some(repository) = parse_remote_repository(&remote) {
            properties.insert("repository".to_string(), repository);
        }
    }

    debug!(dir = %dir.display(), probed = properties.len(), "Probed repository state");
    properties
}

fn git_stdout(dir: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).current_dir(dir).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Extract `owner/repo` from an HTTPS or SSH remote URL.
pub fn parse_remote_repository(remote: &str) -> Option<String> {
    let remote = remote.trim().trim_end_matches(".git");

    if let Some(rest) = remote.strip_prefix("https://") {
        let (_, path) = rest.split_once('/')?;
        return nonempty_repo(path);
    }

    if let Some(rest) = remote.strip_prefix("git@") {
        let (_, path) = rest.split_once(':')?;
        return nonempty_repo(path);
    }

    None
}

fn nonempty_repo(path: &str) -> Option<String> {
    let mut parts = path.splitn(2, '/');
    let owner = parts.next()?;
    let repo = parts.next()?;
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some(format!("{owner}/{repo}"))
}

/// Derive a filesystem-friendly slug from a workflow name.
pub fn slugify(name: &str) -> String {
    let slug: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();

    let trimmed = slug.trim_matches('-');
    if trimmed.is_empty() {
        "workflow".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Derive a filesystem-friendly directory name from a job id (matrix ids
/// contain spaces, colons, and possibly slashes).
pub fn job_dir_name(job_id: &str) -> String {
    job_id
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c => c,
        })
        .collect()
}
