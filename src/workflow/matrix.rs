//! Matrix expansion.
//!
//! A job carrying `strategy.matrix` is replaced by one concrete job per
//! matrix combination. Expansion substitutes `matrix.*` expressions in
//! the job's textual fields and leaves every other `${{ … }}` token in
//! place for the step executor to resolve at run time.

use std::collections::{BTreeMap, HashMap};

use crate::expr;
use crate::workflow::schema::{Job, Matrix, Step, WithValue};

/// One concrete assignment of matrix parameters.
pub type Combination = BTreeMap<String, WithValue>;

/// Expand every matrix job in the map, leaving plain jobs untouched.
///
/// Job ids of expanded jobs are derived from the original id and the
/// combination, so they remain unique as long as the original ids were.
pub fn expand_jobs(jobs: &HashMap<String, Job>) -> HashMap<String, Job> {
    let mut expanded = HashMap::new();

    for (job_id, job) in jobs {
        for (new_id, new_job) in expand_job(job_id, job) {
            expanded.insert(new_id, new_job);
        }
    }

    expanded
}

/// Expand a single job into its concrete instances.
pub fn expand_job(job_id: &str, job: &Job) -> Vec<(String, Job)> {
    let matrix = match job.strategy.as_ref().and_then(|s| s.matrix.as_ref()) {
        Some(matrix) => matrix,
        None => return vec![(job_id.to_string(), job.clone())],
    };

    combinations(matrix)
        .into_iter()
        .map(|combo| {
            let id = expanded_job_id(job_id, &combo);
            (id, instantiate(job, &combo))
        })
        .collect()
}

/// Generate all combinations: cartesian product of the dimensions, minus
/// excludes, plus includes.
pub fn combinations(matrix: &Matrix) -> Vec<Combination> {
    let mut combos: Vec<Combination> = vec![Combination::new()];

    for (key, values) in &matrix.dimensions {
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for combo in &combos {
            for value in values {
                let mut extended = combo.clone();
                extended.insert(key.clone(), value.clone());
                next.push(extended);
            }
        }
        combos = next;
    }

    combos.retain(|combo| !matrix.exclude.iter().any(|ex| matches_subset(combo, ex)));

    for include in &matrix.include {
        apply_include(&mut combos, include, &matrix.dimensions);
    }

    combos
}

/// A combination matches a pattern when every key of the pattern is
/// present in the combination with an equal value.
fn matches_subset(combo: &Combination, pattern: &Combination) -> bool {
    pattern
        .iter()
        .all(|(key, value)| combo.get(key) == Some(value))
}

/// Merge an include into the first combination matching it on dimension
/// keys, or append it as a standalone combination.
fn apply_include(
    combos: &mut Vec<Combination>,
    include: &Combination,
    dimensions: &BTreeMap<String, Vec<WithValue>>,
) {
    let matches_dimensions = |combo: &Combination| {
        dimensions.keys().all(|dim| match include.get(dim) {
            Some(value) => combo.get(dim) == Some(value),
            None => true,
        })
    };

    if let Some(target) = combos.iter_mut().find(|c| matches_dimensions(c)) {
        for (key, value) in include {
            if !dimensions.contains_key(key) {
                target.insert(key.clone(), value.clone());
            }
        }
        return;
    }

    combos.push(include.clone());
}

/// Derive the expanded job id: `"<id> (<k1>: <v1>, <k2>: <v2>, …)"` with
/// sorted keys.
fn expanded_job_id(job_id: &str, combo: &Combination) -> String {
    if combo.is_empty() {
        return job_id.to_string();
    }

    let parts: Vec<String> = combo
        .iter()
        .map(|(key, value)| format!("{key}: {value}"))
        .collect();

    format!("{job_id} ({})", parts.join(", "))
}

/// Clone the job for one combination: clear the strategy and substitute
/// `matrix.*` in every textual field.
fn instantiate(job: &Job, combo: &Combination) -> Job {
    let mut cloned = job.clone();
    cloned.strategy = None;

    cloned.env = substitute_map(&job.env, combo);
    cloned.steps = job.steps.iter().map(|s| instantiate_step(s, combo)).collect();

    cloned
}

fn instantiate_step(step: &Step, combo: &Combination) -> Step {
    let mut cloned = step.clone();

    cloned.name = step.name.as_deref().map(|s| substitute_matrix(s, combo));
    cloned.run = step.run.as_deref().map(|s| substitute_matrix(s, combo));
    cloned.uses = step.uses.as_deref().map(|s| substitute_matrix(s, combo));
    cloned.if_expr = step.if_expr.as_deref().map(|s| substitute_matrix(s, combo));
    cloned.env = substitute_map(&step.env, combo);

    cloned.with = step
        .with
        .iter()
        .map(|(key, value)| {
            let value = match value.as_str() {
                Some(s) => WithValue::String(substitute_matrix(s, combo)),
                None => value.clone(),
            };
            (key.clone(), value)
        })
        .collect();

    cloned
}

fn substitute_map(map: &HashMap<String, String>, combo: &Combination) -> HashMap<String, String> {
    map.iter()
        .map(|(key, value)| (key.clone(), substitute_matrix(value, combo)))
        .collect()
}

/// Substitute only `matrix.*` tokens. A reference to a parameter absent
/// from this combination becomes the empty string; all other expressions
/// pass through untouched.
fn substitute_matrix(input: &str, combo: &Combination) -> String {
    expr::substitute_with(input, |token| {
        token.strip_prefix("matrix.").map(|key| {
            combo
                .get(key)
                .map(ToString::to_string)
                .unwrap_or_default()
        })
    })
}
