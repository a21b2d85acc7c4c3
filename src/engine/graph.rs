//! Job dependency graph validation.
//!
//! Built after matrix expansion, so every id is concrete. Missing
//! dependency targets are rejected at build time; cycle detection is a
//! depth-first traversal with a recursion stack that reports the cycle
//! path.

use std::collections::{HashMap, HashSet};

use crate::error::{Result, VermontError};
use crate::workflow::Job;

/// Directed dependency graph over job ids.
#[derive(Debug, Clone)]
pub struct JobGraph {
    /// Job id -> direct dependencies.
    dependencies: HashMap<String, Vec<String>>,
}

impl JobGraph {
    /// Build the graph, rejecting edges to unknown jobs.
    pub fn build(jobs: &HashMap<String, Job>) -> Result<Self> {
        for (job_id, job) in jobs {
            for dep in &job.needs {
                if !jobs.contains_key(dep) {
                    return Err(VermontError::MissingDependency {
                        job: job_id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        Ok(Self {
            dependencies: jobs
                .iter()
                .map(|(id, job)| (id.clone(), job.needs.clone()))
                .collect(),
        })
    }

    /// Number of jobs in the graph.
    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    /// Whether the graph has no jobs.
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Direct dependencies of a job.
    pub fn dependencies_of(&self, job_id: &str) -> &[String] {
        self.dependencies
            .get(job_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Whether all of a job's dependencies are in the given set.
    pub fn is_ready(&self, job_id: &str, satisfied: &HashSet<String>) -> bool {
        self.dependencies_of(job_id)
            .iter()
            .all(|dep| satisfied.contains(dep))
    }

    /// Reject the graph if it contains a cycle, reporting the cycle path.
    pub fn ensure_acyclic(&self) -> Result<()> {
        if let Some(cycle) = self.find_cycle() {
            return Err(VermontError::CircularDependency {
                cycle: cycle.join(" -> "),
            });
        }
        Ok(())
    }

    /// Find a dependency cycle, returning its path if one exists.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            Visiting,
            Visited,
        }

        fn dfs<'a>(
            node: &'a str,
            graph: &'a JobGraph,
            marks: &mut HashMap<&'a str, Mark>,
            path: &mut Vec<String>,
        ) -> Option<Vec<String>> {
            marks.insert(node, Mark::Visiting);
            path.push(node.to_string());

            for dep in graph.dependencies_of(node) {
                match marks.get(dep.as_str()) {
                    Some(Mark::Visiting) => {
                        let start = path.iter().position(|p| p == dep).unwrap_or(0);
                        let mut cycle: Vec<String> = path[start..].to_vec();
                        cycle.push(dep.clone());
                        return Some(cycle);
                    }
                    Some(Mark::Visited) => {}
                    _ => {
                        if let Some(cycle) = dfs(dep, graph, marks, path) {
                            return Some(cycle);
                        }
                    }
                }
            }

            path.pop();
            marks.insert(node, Mark::Visited);
            None
        }

        let mut marks: HashMap<&str, Mark> = self
            .dependencies
            .keys()
            .map(|id| (id.as_str(), Mark::Unvisited))
            .collect();
        let mut path = Vec::new();

        let mut ids: Vec<&String> = self.dependencies.keys().collect();
        ids.sort();

        for id in ids {
            if marks.get(id.as_str()) == Some(&Mark::Unvisited) {
                if let Some(cycle) = dfs(id, self, &mut marks, &mut path) {
                    return Some(cycle);
                }
            }
        }

        None
    }
}
