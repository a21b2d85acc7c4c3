//! Action metadata (`action.yml` / `action.yaml`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VermontError};
use crate::workflow::Step;

/// Parsed action metadata document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionMetadata {
    /// Action display name.
    pub name: String,

    /// Short description.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Author attribution; informational only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    /// Declared inputs.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub inputs: HashMap<String, ActionInput>,

    /// Declared outputs.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub outputs: HashMap<String, ActionOutput>,

    /// Runtime description.
    pub runs: ActionRuns,
}

/// One declared input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionInput {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,

    pub required: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// One declared output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionOutput {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// The `runs:` block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ActionRuns {
    /// Runtime kind: `composite`, `node12`/`node16`/`node20`, or `docker`.
    pub using: String,

    /// Entrypoint script for the JS runtime.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,

    /// Pre/post scripts. Parsed for forward compatibility; not executed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post: Option<String>,

    /// Sub-steps for the composite runtime; shaped like workflow steps.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Step>,

    /// Image for the Docker runtime.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Entrypoint override for the Docker runtime.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,

    /// Arguments for the Docker runtime.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Extra environment exported to the action.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

/// The closed set of runtimes this engine executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionRuntime {
    /// A sequence of sub-steps.
    Composite,
    /// A JavaScript entrypoint (`node12`/`node16`/`node20` behave alike).
    Node,
    /// A container image with optional entrypoint and args.
    Docker,
}

impl ActionRuntime {
    /// Map `runs.using` onto the runtime set; unknown values are an error
    /// rather than a silent approximation.
    pub fn parse(using: &str) -> Result<Self> {
        match using.to_ascii_lowercase().as_str() {
            "composite" => Ok(ActionRuntime::Composite),
            "node12" | "node16" | "node20" => Ok(ActionRuntime::Node),
            "docker" => Ok(ActionRuntime::Docker),
            other => Err(VermontError::UnsupportedActionRuntime {
                runtime: other.to_string(),
            }),
        }
    }
}

impl ActionMetadata {
    /// Load metadata from an action root: `action.yml` first, then
    /// `action.yaml`.
    pub fn load(action_root: &Path) -> Result<Self> {
        let path = metadata_path(action_root).ok_or_else(|| VermontError::ActionNotFound {
            path: action_root.to_path_buf(),
        })?;

        let content = std::fs::read_to_string(&path)?;
        serde_yaml::from_str(&content).map_err(|e| VermontError::ActionMetadataInvalid {
            path,
            message: e.to_string(),
        })
    }

    /// The runtime this action declares.
    pub fn runtime(&self) -> Result<ActionRuntime> {
        ActionRuntime::parse(&self.runs.using)
    }
}

/// The metadata file under an action root, if present.
pub fn metadata_path(action_root: &Path) -> Option<PathBuf> {
    for filename in ["action.yml", "action.yaml"] {
        let candidate = action_root.join(filename);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}
