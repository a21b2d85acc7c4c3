//! Container engine CLI driver.
//!
//! Every step runs inside a container. This module wraps the configured
//! engine CLI (`docker`-compatible: `run`, `pull`, `build`,
//! `image inspect`, `container prune`) and maps runner labels onto
//! container images.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{Result, VermontError};

/// Runner label to container image mapping; the first matching label of
/// a job's `runs-on` list wins.
const IMAGE_MAP: &[(&str, &str)] = &[
    ("ubuntu-latest", "ubuntu:22.04"),
    ("ubuntu-22.04", "ubuntu:22.04"),
    ("ubuntu-20.04", "ubuntu:20.04"),
    ("debian-latest", "debian:12"),
    ("debian-12", "debian:12"),
    ("debian-11", "debian:11"),
    ("alpine-latest", "alpine:latest"),
    ("alpine", "alpine:latest"),
    ("centos-latest", "centos:8"),
    ("centos-8", "centos:8"),
    ("centos-7", "centos:7"),
];

/// A bind mount from a host path to a container path.
#[derive(Debug, Clone)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

impl Mount {
    /// Read-write mount.
    pub fn rw(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only: false,
        }
    }

    /// Read-only mount.
    pub fn ro(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only: true,
        }
    }

    fn flag_value(&self) -> String {
        let mut value = format!("{}:{}", self.host.display(), self.container);
        if self.read_only {
            value.push_str(":ro");
        }
        value
    }
}

/// One container invocation.
#[derive(Debug, Clone)]
pub struct ContainerRun {
    /// Image to run.
    pub image: String,

    /// Container name.
    pub name: String,

    /// Working directory inside the container.
    pub workdir: String,

    /// Bind mounts.
    pub mounts: Vec<Mount>,

    /// Environment variables passed via `-e`.
    pub env: HashMap<String, String>,

    /// Entrypoint override.
    pub entrypoint: Option<String>,

    /// Command and arguments (after the image).
    pub command: Vec<String>,
}

/// Result of a finished container invocation.
#[derive(Debug)]
pub struct RunOutput {
    /// Exit code (None if killed by signal).
    pub exit_code: Option<i32>,

    /// Whether the container exited zero.
    pub success: bool,

    /// Combined stdout/stderr in arrival order.
    pub output: String,

    /// Wall-clock duration.
    pub duration: Duration,
}

/// Callback receiving combined output lines as they arrive.
pub type OutputCallback<'a> = &'a mut dyn FnMut(&str);

/// Wrapper around the container engine CLI.
pub struct ContainerEngine {
    runtime: String,
    network_mode: String,
    default_image: String,
}

impl ContainerEngine {
    /// Create an engine driver from the configured runtime command.
    pub fn new(
        runtime: impl Into<String>,
        network_mode: impl Into<String>,
        default_image: impl Into<String>,
    ) -> Self {
        Self {
            runtime: runtime.into(),
            network_mode: network_mode.into(),
            default_image: default_image.into(),
        }
    }

    /// The configured runtime command name.
    pub fn runtime(&self) -> &str {
        &self.runtime
    }

    /// Probe the engine CLI.
    pub fn is_available(&self) -> bool {
        Command::new(&self.runtime)
            .arg("version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Map runner labels to a container image; the first known label
    /// wins, unknown labels fall back to the default image.
    pub fn image_for(&self, runs_on: &[String]) -> String {
        for label in runs_on {
            if let Some((_, image)) = IMAGE_MAP.iter().find(|(l, _)| l == label) {
                return image.to_string();
            }
        }

        if !runs_on.is_empty() {
            debug!(labels = ?runs_on, image = %self.default_image, "No label matched, using default image");
        }
        self.default_image.clone()
    }

    /// Shell used when a step does not select one: minimal images get
    /// `sh`, everything else `bash`.
    pub fn shell_for_image(image: &str) -> &'static str {
        if image.contains("alpine") {
            "sh"
        } else {
            "bash"
        }
    }

    /// Ensure an image is present locally, pulling when absent.
    pub fn ensure_image(&self, image: &str) -> Result<()> {
        let inspect = Command::new(&self.runtime)
            .args(["image", "inspect", image])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|_| VermontError::ContainerUnavailable {
                runtime: self.runtime.clone(),
            })?;

        if inspect.success() {
            debug!(image, "Image already present");
            return Ok(());
        }

        info!(image, "Pulling container image");
        let output = Command::new(&self.runtime)
            .args(["pull", image])
            .output()
            .map_err(|_| VermontError::ContainerUnavailable {
                runtime: self.runtime.clone(),
            })?;

        if !output.status.success() {
            return Err(VermontError::CommandFailed {
                command: format!("{} pull {image}", self.runtime),
            });
        }

        Ok(())
    }

    /// Build an image from a directory containing a Dockerfile.
    pub fn build_image(&self, context_dir: &std::path::Path, tag: &str) -> Result<()> {
        info!(tag, context = %context_dir.display(), "Building container image");

        let output = Command::new(&self.runtime)
            .args(["build", "-t", tag])
            .arg(context_dir)
            .output()
            .map_err(|_| VermontError::ContainerUnavailable {
                runtime: self.runtime.clone(),
            })?;

        if !output.status.success() {
            return Err(VermontError::CommandFailed {
                command: format!("{} build -t {tag}", self.runtime),
            });
        }

        Ok(())
    }

    /// Remove leftover engine state from previous runs.
    pub fn prune(&self) {
        let result = Command::new(&self.runtime)
            .args(["container", "prune", "-f"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        if let Err(e) = result {
            warn!(error = %e, "Container prune failed");
        }
    }

    /// Run a container to completion, streaming combined stdout/stderr
    /// line by line into the callback.
    pub fn run(&self, spec: &ContainerRun, on_line: OutputCallback<'_>) -> Result<RunOutput> {
        let start = Instant::now();

        let mut cmd = Command::new(&self.runtime);
        cmd.arg("run")
            .arg("--rm")
            .arg("--name")
            .arg(&spec.name)
            .arg("--workdir")
            .arg(&spec.workdir)
            .arg("--network")
            .arg(&self.network_mode);

        for mount in &spec.mounts {
            cmd.arg("-v").arg(mount.flag_value());
        }

        // Sorted for a reproducible command line.
        let mut env: Vec<_> = spec.env.iter().collect();
        env.sort_by(|a, b| a.0.cmp(b.0));
        for (key, value) in env {
            cmd.arg("-e").arg(format!("{key}={value}"));
        }

        if let Some(entrypoint) = &spec.entrypoint {
            cmd.arg("--entrypoint").arg(entrypoint);
        }

        cmd.arg(&spec.image);
        cmd.args(&spec.command);

        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(Stdio::null());

        debug!(image = %spec.image, name = %spec.name, "Running container");

        let mut child = cmd.spawn().map_err(|_| VermontError::CommandFailed {
            command: format!("{} run {}", self.runtime, spec.image),
        })?;

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");

        let (tx, rx) = mpsc::channel::<String>();
        let tx_err = tx.clone();

        let stdout_handle = thread::spawn(move || {
            for line in BufReader::new(stdout).lines().map_while(|l| l.ok()) {
                let _ = tx.send(line);
            }
        });
        let stderr_handle = thread::spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                let _ = tx_err.send(line);
            }
        });

        let mut combined = String::new();
        for line in rx {
            on_line(&line);
            combined.push_str(&line);
            combined.push('\n');
        }

        let _ = stdout_handle.join();
        let _ = stderr_handle.join();

        let status = child.wait().map_err(|_| VermontError::CommandFailed {
            command: format!("{} run {}", self.runtime, spec.image),
        })?;

        Ok(RunOutput {
            exit_code: status.code(),
            success: status.success(),
            output: combined,
            duration: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ContainerEngine {
        ContainerEngine::new("docker", "host", "ubuntu:22.04")
    }

    #[test]
    fn first_matching_label_selects_image() {
        let image = engine().image_for(&["self-hosted".into(), "alpine".into()]);
        assert_eq!(image, "alpine:latest");
    }

    #[test]
    fn known_labels_map_to_images() {
        let engine = engine();
        assert_eq!(engine.image_for(&["ubuntu-latest".into()]), "ubuntu:22.04");
        assert_eq!(engine.image_for(&["ubuntu-20.04".into()]), "ubuntu:20.04");
        assert_eq!(engine.image_for(&["debian-12".into()]), "debian:12");
        assert_eq!(engine.image_for(&["centos-7".into()]), "centos:7");
    }

    #[test]
    fn unknown_labels_fall_back_to_default() {
        assert_eq!(engine().image_for(&["macos-14".into()]), "ubuntu:22.04");
        assert_eq!(engine().image_for(&[]), "ubuntu:22.04");
    }

    #[test]
    fn alpine_images_use_sh() {
        assert_eq!(ContainerEngine::shell_for_image("alpine:latest"), "sh");
        assert_eq!(ContainerEngine::shell_for_image("alpine:3.19"), "sh");
        assert_eq!(ContainerEngine::shell_for_image("ubuntu:22.04"), "bash");
    }

    #[test]
    fn mount_flag_value_formats() {
        let rw = Mount::rw("/tmp/job", "/workspace");
        assert_eq!(rw.flag_value(), "/tmp/job:/workspace");

        let ro = Mount::ro("/tmp/action", "/action");
        assert_eq!(ro.flag_value(), "/tmp/action:/action:ro");
    }

    #[test]
    fn missing_runtime_is_unavailable() {
        let engine = ContainerEngine::new("vermont-no-such-runtime", "host", "ubuntu:22.04");
        assert!(!engine.is_available());
    }

    #[test]
    fn run_streams_combined_output() {
        // `sh` doubles as a stand-in engine: `sh run --rm … image cmd…`
        // is not meaningful, so use a tiny wrapper that ignores the
        // engine flags and executes `echo` through the real shell.
        let temp = tempfile::TempDir::new().unwrap();
        let fake = temp.path().join("fake-engine");
        std::fs::write(
            &fake,
            "#!/bin/sh\nshift $(($# - 1))\neval \"$1\"\n",
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let engine = ContainerEngine::new(fake.display().to_string(), "host", "ubuntu:22.04");
        let spec = ContainerRun {
            image: "ignored".into(),
            name: "test".into(),
            workdir: "/".into(),
            mounts: vec![],
            env: HashMap::new(),
            entrypoint: None,
            command: vec!["echo one && echo two".into()],
        };

        let mut lines = Vec::new();
        let output = engine
            .run(&spec, &mut |line| lines.push(line.to_string()))
            .unwrap();

        assert!(output.success);
        assert!(output.output.contains("one"));
        assert!(output.output.contains("two"));
        assert_eq!(lines.len(), 2);
    }
}
