//! Workflow schema definitions.
//!
//! This module contains the struct definitions that map to the workflow
//! YAML format. Fields that accept more than one source shape
//! (`runs-on`, `needs`, `on`, matrix values) are normalised to a single
//! in-memory representation during deserialization so downstream code
//! never branches on the original shape.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::de::{Deserializer, Error as DeError};
use serde::{Deserialize, Serialize};

/// Root workflow document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Workflow {
    /// Workflow display name.
    pub name: String,

    /// Trigger event names. The trigger is parsed but not interpreted by
    /// the engine; a scalar, a list, or a mapping all normalise to the
    /// list of event names.
    #[serde(rename = "on", deserialize_with = "trigger_list")]
    pub on: Vec<String>,

    /// Workflow-level environment variables.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    /// Jobs keyed by job id.
    pub jobs: HashMap<String, Job>,
}

/// A single job within a workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Job {
    /// Human-readable job name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Runner labels; a scalar in the source becomes a single-element list.
    /// The first label selects the container image.
    #[serde(deserialize_with = "string_or_list")]
    pub runs_on: Vec<String>,

    /// Job ids this job depends on; scalar or list in the source.
    #[serde(deserialize_with = "string_or_list", skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,

    /// Conditional expression. Parsed, not evaluated.
    #[serde(rename = "if", skip_serializing_if = "Option::is_none")]
    pub if_expr: Option<String>,

    /// Ordered steps.
    pub steps: Vec<Step>,

    /// Job-level environment variables.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    /// Matrix strategy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,

    /// Parsed for forward compatibility; not acted upon.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<serde_yaml::Value>,

    /// Parsed for forward compatibility; not acted upon.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub services: Option<serde_yaml::Value>,

    /// Parsed for forward compatibility; not acted upon.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub outputs: HashMap<String, String>,

    /// Parsed for forward compatibility; not enforced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<u64>,

    /// Parsed for forward compatibility; not acted upon.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defaults: Option<serde_yaml::Value>,
}

/// A single step within a job. Exactly one of `run` / `uses` is set;
/// the parser enforces this.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Step {
    /// Step id, used as the key for step outputs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Human-readable label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Shell command, possibly multi-line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,

    /// Action reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uses: Option<String>,

    /// Action inputs; values are arbitrary scalars.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub with: HashMap<String, WithValue>,

    /// Step-level environment variables.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    /// Conditional expression. Parsed, not evaluated.
    #[serde(rename = "if", skip_serializing_if = "Option::is_none")]
    pub if_expr: Option<String>,

    /// Shell interpreter override; defaults by image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,

    /// Working directory override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,

    /// Parsed for forward compatibility; not enforced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<u64>,

    /// A failing step with this set does not fail the job.
    #[serde(skip_serializing_if = "is_false")]
    pub continue_on_error: bool,
}

fn is_false(v: &bool) -> bool {
    !v
}

impl Step {
    /// Display label: the step name when present, otherwise the command
    /// or action reference.
    pub fn label(&self) -> &str {
        if let Some(name) = &self.name {
            return name;
        }
        if let Some(uses) = &self.uses {
            return uses;
        }
        self.run.as_deref().unwrap_or("")
    }
}

/// Matrix strategy block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Strategy {
    /// Parametric job description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matrix: Option<Matrix>,

    /// Parsed, not enforced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_fast: Option<bool>,

    /// Parsed, not enforced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,
}

/// A matrix: named dimensions plus the reserved `include` / `exclude`
/// combination lists.
///
/// Dimensions are kept in a sorted map so expansion order and expanded
/// job ids are stable for a given workflow.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Matrix {
    /// Parameter name -> ordered value list. Scalar values in the source
    /// become single-element lists.
    pub dimensions: BTreeMap<String, Vec<WithValue>>,

    /// Extra combinations to merge or append.
    pub include: Vec<BTreeMap<String, WithValue>>,

    /// Combinations to remove.
    pub exclude: Vec<BTreeMap<String, WithValue>>,
}

impl<'de> Deserialize<'de> for Matrix {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: BTreeMap<String, serde_yaml::Value> = BTreeMap::deserialize(deserializer)?;
        let mut matrix = Matrix::default();

        for (key, value) in raw {
            match key.as_str() {
                "include" => {
                    matrix.include = combination_list::<D>(&value, "include")?;
                }
                "exclude" => {
                    matrix.exclude = combination_list::<D>(&value, "exclude")?;
                }
                _ => {
                    let values = match value {
                        serde_yaml::Value::Sequence(seq) => seq
                            .into_iter()
                            .map(|v| scalar_value::<D>(v, &key))
                            .collect::<std::result::Result<Vec<_>, _>>()?,
                        other => vec![scalar_value::<D>(other, &key)?],
                    };
                    matrix.dimensions.insert(key, values);
                }
            }
        }

        Ok(matrix)
    }
}

/// Decode `include` / `exclude`: a list of flat mappings.
fn combination_list<'de, D>(
    value: &serde_yaml::Value,
    key: &str,
) -> std::result::Result<Vec<BTreeMap<String, WithValue>>, D::Error>
where
    D: Deserializer<'de>,
{
    let serde_yaml::Value::Sequence(entries) = value else {
        return Err(DeError::custom(format!("matrix {key} must be a list")));
    };

    entries
        .iter()
        .map(|entry| {
            let serde_yaml::Value::Mapping(map) = entry else {
                return Err(DeError::custom(format!(
                    "matrix {key} entries must be mappings"
                )));
            };
            map.iter()
                .map(|(k, v)| {
                    let name = k
                        .as_str()
                        .ok_or_else(|| DeError::custom("matrix keys must be strings"))?
                        .to_string();
                    let value = scalar_value::<D>(v.clone(), &name)?;
                    Ok((name, value))
                })
                .collect()
        })
        .collect()
}

/// Decode one matrix scalar.
fn scalar_value<'de, D>(
    value: serde_yaml::Value,
    key: &str,
) -> std::result::Result<WithValue, D::Error>
where
    D: Deserializer<'de>,
{
    WithValue::from_yaml(value)
        .ok_or_else(|| DeError::custom(format!("matrix value for '{key}' must be a scalar")))
}

/// A polymorphic scalar as found in `with:` mappings and matrix values.
///
/// The tag never leaks past the parser/substituter boundary: everything
/// downstream consumes the canonical stringification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WithValue {
    /// Boolean scalar.
    Bool(bool),
    /// Numeric scalar (integer or float).
    Number(serde_yaml::Number),
    /// String scalar.
    String(String),
}

impl WithValue {
    /// Convert a YAML value, rejecting non-scalars.
    pub fn from_yaml(value: serde_yaml::Value) -> Option<Self> {
        match value {
            serde_yaml::Value::Bool(b) => Some(WithValue::Bool(b)),
            serde_yaml::Value::Number(n) => Some(WithValue::Number(n)),
            serde_yaml::Value::String(s) => Some(WithValue::String(s)),
            _ => None,
        }
    }

    /// Whether this value is a string scalar.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            WithValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for WithValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WithValue::Bool(b) => write!(f, "{}", b),
            WithValue::Number(n) => write!(f, "{}", n),
            WithValue::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for WithValue {
    fn from(s: &str) -> Self {
        WithValue::String(s.to_string())
    }
}

/// Deserialize a field that may be a single string or a list of strings
/// into a list.
fn string_or_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Shape {
        One(String),
        Many(Vec<String>),
    }

    match Option::<Shape>::deserialize(deserializer)? {
        None => Ok(Vec::new()),
        Some(Shape::One(s)) => Ok(vec![s]),
        Some(Shape::Many(list)) => Ok(list),
    }
}

/// Deserialize the trigger descriptor: a scalar event name, a list of
/// event names, or a mapping whose keys are event names.
fn trigger_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_yaml::Value>::deserialize(deserializer)? {
        None => Ok(Vec::new()),
        Some(serde_yaml::Value::String(s)) => Ok(vec![s]),
        Some(serde_yaml::Value::Sequence(seq)) => Ok(seq
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()),
        Some(serde_yaml::Value::Mapping(map)) => Ok(map
            .keys()
            .filter_map(|k| k.as_str().map(str::to_string))
            .collect()),
        Some(_) => Err(DeError::custom(
            "'on' must be a string, a list, or a mapping",
        )),
    }
}
