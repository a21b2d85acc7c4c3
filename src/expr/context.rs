//! Layered evaluation context for template expressions.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Fallback values for `github.*` properties that are not configured and
/// cannot be derived from the invoking repository.
const GITHUB_DEFAULTS: &[(&str, &str)] = &[
    ("repository", "owner/repo"),
    ("sha", "0000000000000000000000000000000000000000"),
    ("ref", "refs/heads/main"),
    ("actor", "vermont-runner"),
    ("workspace", "/workspace"),
    ("event_name", "workflow_dispatch"),
    ("token", ""),
];

/// Evaluation context consulted by the substituter.
///
/// Layers are filled in by the caller as they become available: matrix
/// values at expansion time, inputs during action invocation, step
/// outputs as the job progresses.
#[derive(Debug, Default, Clone)]
pub struct ExprContext {
    /// Current matrix combination, stringified.
    pub matrix: BTreeMap<String, String>,

    /// Inputs of the action invocation currently executing.
    pub inputs: HashMap<String, String>,

    /// Effective environment mapping.
    pub env: HashMap<String, String>,

    /// Output table of the currently executing job: step id -> name -> value.
    pub step_outputs: HashMap<String, HashMap<String, String>>,

    /// `github.*` properties (configured or probed from the repository).
    pub github: HashMap<String, String>,

    /// Workspace root used to resolve `hashFiles()` patterns.
    pub workspace: Option<PathBuf>,
}

impl ExprContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the environment layer.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Set the `github.*` property map.
    pub fn with_github(mut self, github: HashMap<String, String>) -> Self {
        self.github = github;
        self
    }

    /// Set the workspace root for `hashFiles()`.
    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    /// Set the action-input layer.
    pub fn with_inputs(mut self, inputs: HashMap<String, String>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Evaluate a single expression to its replacement string.
    ///
    /// Unknown expressions evaluate to the empty string.
    pub fn evaluate(&self, expr: &str) -> String {
        if let Some(key) = expr.strip_prefix("matrix.") {
            return self.matrix.get(key).cloned().unwrap_or_default();
        }

        if let Some(name) = expr.strip_prefix("inputs.") {
            return self.inputs.get(name).cloned().unwrap_or_default();
        }

        if let Some(name) = expr.strip_prefix("env.") {
            return self.env.get(name).cloned().unwrap_or_default();
        }

        if expr.starts_with("steps.") {
            return self.step_output(expr);
        }

        if expr.starts_with("needs.") {
            // Only successful dependencies let a job run, so a resolvable
            // result is always "success". Cross-job outputs are not wired
            // through the scheduler and resolve to a marker value.
            if expr.ends_with(".result") {
                return "success".to_string();
            }
            if expr.contains(".outputs.") {
                return "unknown".to_string();
            }
            return String::new();
        }

        if let Some(prop) = expr.strip_prefix("github.") {
            return self.github_property(prop);
        }

        if let Some(prop) = expr.strip_prefix("runner.") {
            return runner_property(prop).to_string();
        }

        if let Some(args) = expr
            .strip_prefix("hashFiles(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            return self.hash_files(args);
        }

        String::new()
    }

    /// Resolve `steps.<id>.outputs.<name>`.
    fn step_output(&self, expr: &str) -> String {
        let parts: Vec<&str> = expr.split('.').collect();
        if parts.len() >= 4 && parts[0] == "steps" && parts[2] == "outputs" {
            let name = parts[3..].join(".");
            if let Some(outputs) = self.step_outputs.get(parts[1]) {
                return outputs.get(&name).cloned().unwrap_or_default();
            }
        }
        String::new()
    }

    /// Resolve `github.<prop>`: configured value first, then the
    /// documented literal, then empty.
    fn github_property(&self, prop: &str) -> String {
        if let Some(value) = self.github.get(prop) {
            return value.clone();
        }
        GITHUB_DEFAULTS
            .iter()
            .find(|(name, _)| *name == prop)
            .map(|(_, value)| value.to_string())
            .unwrap_or_default()
    }

    /// Compute `hashFiles(<patterns>)`: a SHA-256 digest over the
    /// per-file digests of every workspace file matching any pattern,
    /// hex-encoded. No matches (or no workspace) yields the empty string.
    fn hash_files(&self, args: &str) -> String {
        let workspace = match &self.workspace {
            Some(ws) => ws,
            None => return String::new(),
        };

        let mut matched: Vec<PathBuf> = Vec::new();
        for raw in args.split(',') {
            let pattern = raw.trim().trim_matches('\'').trim_matches('"');
            if pattern.is_empty() {
                continue;
            }
            matched.extend(glob_under(workspace, pattern));
        }

        matched.sort();
        matched.dedup();

        if matched.is_empty() {
            return String::new();
        }

        let mut combined = Sha256::new();
        for path in &matched {
            match std::fs::read(path) {
                Ok(bytes) => combined.update(Sha256::digest(&bytes)),
                Err(_) => continue,
            }
        }

        hex::encode(combined.finalize())
    }
}

/// Resolve `runner.<prop>` to its fixed literal.
fn runner_property(prop: &str) -> &'static str {
    match prop {
        "os" => "Linux",
        "arch" => "X64",
        "name" => "Vermont Runner",
        "tool_cache" | "tool-cache" => "/opt/hostedtoolcache",
        "debug" => "false",
        _ => "",
    }
}

/// Expand a glob pattern relative to a root, returning matched files.
fn glob_under(root: &Path, pattern: &str) -> Vec<PathBuf> {
    let full = root.join(pattern);
    let Some(full) = full.to_str() else {
        return Vec::new();
    };

    match glob::glob(full) {
        Ok(paths) => paths
            .filter_map(std::result::Result::ok)
            .filter(|p| p.is_file())
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::substitute;
    use tempfile::TempDir;

    #[test]
    fn matrix_values_resolve() {
        let mut ctx = ExprContext::new();
        ctx.matrix.insert("os".to_string(), "ubuntu".to_string());

        assert_eq!(ctx.evaluate("matrix.os"), "ubuntu");
        assert_eq!(ctx.evaluate("matrix.missing"), "");
    }

    #[test]
    fn inputs_resolve() {
        let mut inputs = HashMap::new();
        inputs.insert("name".to_string(), "Vermont".to_string());
        let ctx = ExprContext::new().with_inputs(inputs);

        assert_eq!(ctx.evaluate("inputs.name"), "Vermont");
    }

    #[test]
    fn env_resolves() {
        let mut env = HashMap::new();
        env.insert("BUILD_MODE".to_string(), "release".to_string());
        let ctx = ExprContext::new().with_env(env);

        assert_eq!(ctx.evaluate("env.BUILD_MODE"), "release");
        assert_eq!(ctx.evaluate("env.MISSING"), "");
    }

    #[test]
    fn step_outputs_resolve() {
        let mut ctx = ExprContext::new();
        let mut outputs = HashMap::new();
        outputs.insert("answer".to_string(), "42".to_string());
        ctx.step_outputs.insert("set".to_string(), outputs);

        assert_eq!(ctx.evaluate("steps.set.outputs.answer"), "42");
        assert_eq!(ctx.evaluate("steps.set.outputs.other"), "");
        assert_eq!(ctx.evaluate("steps.unknown.outputs.answer"), "");
    }

    #[test]
    fn needs_result_is_success() {
        let ctx = ExprContext::new();
        assert_eq!(ctx.evaluate("needs.build.result"), "success");
    }

    #[test]
    fn needs_outputs_are_unknown() {
        let ctx = ExprContext::new();
        assert_eq!(ctx.evaluate("needs.build.outputs.version"), "unknown");
    }

    #[test]
    fn github_defaults_apply() {
        let ctx = ExprContext::new();
        assert_eq!(ctx.evaluate("github.repository"), "owner/repo");
        assert_eq!(ctx.evaluate("github.ref"), "refs/heads/main");
        assert_eq!(ctx.evaluate("github.sha").len(), 40);
        assert_eq!(ctx.evaluate("github.workspace"), "/workspace");
        assert_eq!(ctx.evaluate("github.event_name"), "workflow_dispatch");
    }

    #[test]
    fn configured_github_values_win() {
        let mut github = HashMap::new();
        github.insert("repository".to_string(), "acme/widgets".to_string());
        let ctx = ExprContext::new().with_github(github);

        assert_eq!(ctx.evaluate("github.repository"), "acme/widgets");
    }

    #[test]
    fn runner_properties_are_fixed() {
        let ctx = ExprContext::new();
        assert_eq!(ctx.evaluate("runner.os"), "Linux");
        assert_eq!(ctx.evaluate("runner.arch"), "X64");
        assert_eq!(ctx.evaluate("runner.name"), "Vermont Runner");
        assert_eq!(ctx.evaluate("runner.tool_cache"), "/opt/hostedtoolcache");
        assert_eq!(ctx.evaluate("runner.debug"), "false");
    }

    #[test]
    fn unknown_expressions_are_empty() {
        let ctx = ExprContext::new();
        assert_eq!(ctx.evaluate("secrets.TOKEN"), "");
        assert_eq!(ctx.evaluate("bogus"), "");
    }

    #[test]
    fn hash_files_without_workspace_is_empty() {
        let ctx = ExprContext::new();
        assert_eq!(ctx.evaluate("hashFiles('**/Cargo.lock')"), "");
    }

    #[test]
    fn hash_files_is_deterministic() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.lock"), "alpha").unwrap();
        std::fs::write(temp.path().join("b.lock"), "beta").unwrap();

        let ctx = ExprContext::new().with_workspace(temp.path());

        let first = ctx.evaluate("hashFiles('*.lock')");
        let second = ctx.evaluate("hashFiles('*.lock')");

        assert_eq!(first.len(), 64);
        assert_eq!(first, second);
    }

    #[test]
    fn hash_files_changes_with_content() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("deps.lock");
        std::fs::write(&file, "one").unwrap();

        let ctx = ExprContext::new().with_workspace(temp.path());
        let before = ctx.evaluate("hashFiles('deps.lock')");

        std::fs::write(&file, "two").unwrap();
        let after = ctx.evaluate("hashFiles('deps.lock')");

        assert_ne!(before, after);
    }

    #[test]
    fn hash_files_no_match_is_empty() {
        let temp = TempDir::new().unwrap();
        let ctx = ExprContext::new().with_workspace(temp.path());
        assert_eq!(ctx.evaluate("hashFiles('*.nope')"), "");
    }

    #[test]
    fn full_substitution_clears_unknown_tokens() {
        let ctx = ExprContext::new();
        let out = substitute("echo '${{ secrets.TOKEN }}' done", &ctx);
        assert_eq!(out, "echo '' done");
    }

    #[test]
    fn full_substitution_mixes_layers() {
        let mut ctx = ExprContext::new();
        ctx.matrix.insert("os".to_string(), "alpine".to_string());
        ctx.env.insert("TAG".to_string(), "v1".to_string());

        let out = substitute("build-${{ matrix.os }}-${{ env.TAG }}", &ctx);
        assert_eq!(out, "build-alpine-v1");
    }
}
