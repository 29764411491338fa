// Execution Graph
// Projects `needs` declarations onto matrix-expanded instances, validates
// the DAG, and aggregates dependency results

use crate::execution::context::{NeedsSnapshot, Outcome};
use crate::execution::matrix::{self, MatrixInstance};
use crate::workflow::models::Workflow;

use std::collections::{HashMap, HashSet};

use thiserror::Error;

/// Errors that abort a run before any execution starts.
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    #[error("job `{job}` needs unknown job `{needs}`")]
    UnknownDependency { job: String, needs: String },

    #[error("dependency cycle: {}", cycle.join(" -> "))]
    Cycle { cycle: Vec<String> },

    #[error("unknown job `{job}`")]
    UnknownJob { job: String },
}

/// A job with its dependency edges and expanded instances.
#[derive(Debug, Clone)]
pub struct JobNode {
    pub id: String,
    pub needs: Vec<String>,
    pub instances: Vec<MatrixInstance>,
    pub fail_fast: bool,
    pub max_parallel: Option<u32>,
}

/// The dependency graph over job instances.
///
/// Edges stay at the job level: an instance is eligible once every
/// instance of every needed job is terminal, so per-instance edges would
/// add nothing.
#[derive(Debug, Clone)]
pub struct ExecutionGraph {
    pub jobs: Vec<JobNode>,
}

impl ExecutionGraph {
    /// Build and validate the graph for a workflow.
    pub fn build(workflow: &Workflow) -> Result<Self, GraphError> {
        // Unknown `needs` targets first: cycle detection assumes edges
        // resolve
        for (job_id, job) in &workflow.jobs {
            for needed in job.needs.to_vec() {
                if !workflow.jobs.contains_key(&needed) {
                    return Err(GraphError::UnknownDependency {
                        job: job_id.clone(),
                        needs: needed,
                    });
                }
            }
        }

        Self::check_cycles(workflow)?;

        let jobs = workflow
            .jobs
            .iter()
            .map(|(job_id, job)| {
                let (fail_fast, max_parallel) = job
                    .strategy
                    .as_ref()
                    .map(|s| (s.fail_fast, s.max_parallel))
                    .unwrap_or((true, None));
                JobNode {
                    id: job_id.clone(),
                    needs: job.needs.to_vec(),
                    instances: matrix::expand(job_id, job.strategy.as_ref()),
                    fail_fast,
                    max_parallel,
                }
            })
            .collect();

        Ok(Self { jobs })
    }

    fn check_cycles(workflow: &Workflow) -> Result<(), GraphError> {
        let mut visited = HashSet::new();
        let mut rec_stack = Vec::new();

        for job_id in workflow.jobs.keys() {
            if let Some(cycle) = Self::dfs_cycle(workflow, job_id, &mut visited, &mut rec_stack) {
                return Err(GraphError::Cycle { cycle });
            }
        }

        Ok(())
    }

    fn dfs_cycle(
        workflow: &Workflow,
        job_id: &str,
        visited: &mut HashSet<String>,
        rec_stack: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        if rec_stack.iter().any(|id| id == job_id) {
            // Report the cycle from its first occurrence, closed back on
            // itself
            let start = rec_stack.iter().position(|id| id == job_id).unwrap_or(0);
            let mut cycle: Vec<String> = rec_stack[start..].to_vec();
            cycle.push(job_id.to_string());
            return Some(cycle);
        }

        if visited.contains(job_id) {
            return None;
        }

        rec_stack.push(job_id.to_string());
        if let Some(job) = workflow.jobs.get(job_id) {
            for needed in job.needs.to_vec() {
                if let Some(cycle) = Self::dfs_cycle(workflow, &needed, visited, rec_stack) {
                    return Some(cycle);
                }
            }
        }
        rec_stack.pop();
        visited.insert(job_id.to_string());

        None
    }

    /// Restrict the graph to one job and its transitive dependencies.
    pub fn restrict_to(&mut self, job_id: &str) -> Result<(), GraphError> {
        if !self.jobs.iter().any(|j| j.id == job_id) {
            return Err(GraphError::UnknownJob {
                job: job_id.to_string(),
            });
        }

        let by_id: HashMap<String, Vec<String>> = self
            .jobs
            .iter()
            .map(|j| (j.id.clone(), j.needs.clone()))
            .collect();

        let mut keep = HashSet::new();
        let mut stack = vec![job_id.to_string()];
        while let Some(id) = stack.pop() {
            if keep.insert(id.clone()) {
                if let Some(needs) = by_id.get(&id) {
                    stack.extend(needs.iter().cloned());
                }
            }
        }

        self.jobs.retain(|j| keep.contains(&j.id));
        Ok(())
    }

    /// Topological order of job ids (Kahn's algorithm). The graph is
    /// already validated acyclic, so every job appears.
    pub fn topological_order(&self) -> Vec<String> {
        let mut in_degree: HashMap<&str, usize> = self
            .jobs
            .iter()
            .map(|j| (j.id.as_str(), j.needs.len()))
            .collect();

        let mut order = Vec::with_capacity(self.jobs.len());
        let mut ready: Vec<&str> = self
            .jobs
            .iter()
            .filter(|j| j.needs.is_empty())
            .map(|j| j.id.as_str())
            .collect();

        while let Some(id) = ready.pop() {
            order.push(id.to_string());
            for job in &self.jobs {
                if job.needs.iter().any(|n| n == id) {
                    if let Some(degree) = in_degree.get_mut(job.id.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.push(job.id.as_str());
                        }
                    }
                }
            }
        }

        order
    }

    pub fn job(&self, job_id: &str) -> Option<&JobNode> {
        self.jobs.iter().find(|j| j.id == job_id)
    }
}

/// Collapse the terminal instance outcomes of one dependency into the
/// `needs.<job>` view its dependents see.
///
/// Result: failure if any instance failed, else cancelled if any was
/// cancelled, else skipped if all were skipped, else success. Outputs
/// come from the first successful instance in expansion order - the
/// documented tie-break when several instances write the same key.
/// A failed instance of a `continue-on-error` job counts as success for
/// gating (its dependents still run) while keeping failure in the report.
pub fn aggregate_needs(
    outcomes: &[(Outcome, HashMap<String, String>)],
    continue_on_error: bool,
) -> NeedsSnapshot {
    let effective = |o: Outcome| {
        if continue_on_error && o == Outcome::Failure {
            Outcome::Success
        } else {
            o
        }
    };

    let result = if outcomes.iter().any(|(o, _)| effective(*o) == Outcome::Failure) {
        Outcome::Failure
    } else if outcomes.iter().any(|(o, _)| effective(*o) == Outcome::Cancelled) {
        Outcome::Cancelled
    } else if outcomes.iter().all(|(o, _)| *o == Outcome::Skipped) {
        Outcome::Skipped
    } else {
        Outcome::Success
    };

    let outputs = outcomes
        .iter()
        .find(|(o, _)| *o == Outcome::Success)
        .map(|(_, outputs)| outputs.clone())
        .unwrap_or_default();

    NeedsSnapshot {
        result: result.to_string(),
        outputs,
    }
}
