// Step Runner
// The pluggable boundary between the scheduler and whatever actually
// performs a step

use crate::workflow::models::Step;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// A runner-level fault, distinct from a step that ran and failed.
#[derive(Debug, Error)]
#[error("step execution failed: {message}")]
pub struct StepExecutionError {
    message: String,
}

impl StepExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// What a runner says about a step it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Success,
    Failure,
}

/// A completed step as reported by the runner.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub outcome: StepOutcome,
    pub duration: Duration,
    /// Outputs the step produced, visible to later steps and, through
    /// job outputs, to dependent jobs
    pub outputs: HashMap<String, String>,
}

impl StepReport {
    pub fn success() -> Self {
        Self {
            outcome: StepOutcome::Success,
            duration: Duration::ZERO,
            outputs: HashMap::new(),
        }
    }

    pub fn failure() -> Self {
        Self {
            outcome: StepOutcome::Failure,
            duration: Duration::ZERO,
            outputs: HashMap::new(),
        }
    }

    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }
}

/// Everything a runner sees about the step it is asked to run, fully
/// rendered: no `${{ }}` markers remain.
#[derive(Debug, Clone)]
pub struct StepExecution {
    pub job_id: String,
    pub instance_name: String,
    /// Merged environment: defaults, workflow, job, then step overlay
    pub env: HashMap<String, String>,
    /// The rendered `run` command, absent for `uses:` steps
    pub command: Option<String>,
}

/// Executes a single step. Implementations decide what "run" means:
/// simulate it, shell out, or record it for assertions.
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run_step(
        &self,
        step: &Step,
        execution: &StepExecution,
    ) -> Result<StepReport, StepExecutionError>;
}

/// The default runner: every step succeeds instantly without side
/// effects. Useful for dry runs that exercise only the control plane.
#[derive(Debug, Default)]
pub struct SimulatedRunner;

#[async_trait]
impl StepRunner for SimulatedRunner {
    async fn run_step(
        &self,
        _step: &Step,
        _execution: &StepExecution,
    ) -> Result<StepReport, StepExecutionError> {
        Ok(StepReport::success())
    }
}
