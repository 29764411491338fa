// Instance Context
// Layered per-instance state: env layers, matrix values, step results,
// dependency snapshots

use crate::expression::evaluator::{
    evaluate, ExpressionContext, ExpressionError, NeedsContext, StatusContext, StepContext,
};
use crate::expression::lexer::{extract_segments, Segment};
use crate::expression::parser::Expr;
use crate::expression::Evaluator;
use crate::workflow::models::{Job, Value, Workflow};

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

/// Terminal state of a step or job instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
    Skipped,
    Cancelled,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Skipped => "skipped",
            Outcome::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A finalized step result held in the context store.
#[derive(Debug, Clone)]
pub struct StepState {
    pub outcome: Outcome,
    pub outputs: HashMap<String, String>,
}

impl Default for StepState {
    fn default() -> Self {
        Self {
            outcome: Outcome::Success,
            outputs: HashMap::new(),
        }
    }
}

/// A dependency's aggregated terminal result, snapshotted when the
/// dependent instance becomes eligible. Immutable afterwards.
#[derive(Debug, Clone, Default)]
pub struct NeedsSnapshot {
    pub result: String,
    pub outputs: HashMap<String, String>,
}

/// Mutable per-job-instance state, created when the instance becomes
/// eligible and discarded when it terminates.
///
/// Environment lookup walks an explicit layer stack top-down:
/// step env > job env > workflow env > seeded defaults. Step results are
/// append-once; a finalized step id is never overwritten.
#[derive(Debug, Clone)]
pub struct InstanceContext {
    github: HashMap<String, Value>,
    /// Bottom-to-top: seeded defaults, workflow env, job env
    env_layers: Vec<HashMap<String, String>>,
    matrix: HashMap<String, Value>,
    steps: HashMap<String, StepState>,
    needs: HashMap<String, NeedsSnapshot>,
    pub status: StatusContext,
}

impl InstanceContext {
    pub fn new(
        workflow: &Workflow,
        job_id: &str,
        job: &Job,
        matrix: HashMap<String, Value>,
        needs: HashMap<String, NeedsSnapshot>,
        initial_env: &HashMap<String, String>,
    ) -> Self {
        let mut defaults = default_env(workflow.name.as_deref(), job_id);
        for (k, v) in initial_env {
            defaults.insert(k.clone(), v.clone());
        }

        let mut github = HashMap::new();
        if let Some(name) = &workflow.name {
            github.insert("workflow".to_string(), Value::from(name.as_str()));
        }
        github.insert("job".to_string(), Value::from(job_id));

        let mut status = StatusContext::default();
        for snapshot in needs.values() {
            match snapshot.result.as_str() {
                "failure" => status.failure = true,
                "cancelled" => status.cancelled = true,
                _ => {}
            }
        }

        Self {
            github,
            env_layers: vec![defaults, workflow.env.clone(), job.env.clone()],
            matrix,
            steps: HashMap::new(),
            needs,
            status,
        }
    }

    /// Record a step's terminal outcome. Append-once: a second call for
    /// the same id is ignored.
    pub fn set_outcome(&mut self, step_id: &str, outcome: Outcome) {
        self.steps
            .entry(step_id.to_string())
            .or_insert_with(|| StepState {
                outcome,
                outputs: HashMap::new(),
            });
    }

    /// Record a step output. Set-if-absent per key; outputs of a
    /// finalized step never change retroactively.
    pub fn set_output(&mut self, step_id: &str, key: &str, value: &str) {
        self.steps
            .entry(step_id.to_string())
            .or_default()
            .outputs
            .entry(key.to_string())
            .or_insert_with(|| value.to_string());
    }

    /// Outputs recorded so far for a step id, if any.
    pub fn step_outputs(&self, step_id: &str) -> Option<&HashMap<String, String>> {
        self.steps.get(step_id).map(|s| &s.outputs)
    }

    /// Resolve a dotted context path. Unresolvable paths yield null.
    pub fn resolve(&self, path: &str) -> Value {
        let Ok(ast) = Expr::parse(path) else {
            return Value::Null;
        };
        let ctx = self.to_expression_context(None);
        Evaluator::new(&ctx).eval(&ast).unwrap_or(Value::Null)
    }

    /// Merge env layers bottom-up into one map, topped by an optional
    /// step-level overlay.
    pub fn merged_env(&self, step_env: Option<&HashMap<String, String>>) -> HashMap<String, String> {
        let mut merged = HashMap::new();
        for layer in &self.env_layers {
            for (k, v) in layer {
                merged.insert(k.clone(), v.clone());
            }
        }
        if let Some(overlay) = step_env {
            for (k, v) in overlay {
                merged.insert(k.clone(), v.clone());
            }
        }
        merged
    }

    /// Build the read-only snapshot expressions evaluate against.
    pub fn to_expression_context(
        &self,
        step_env: Option<&HashMap<String, String>>,
    ) -> ExpressionContext {
        let env = self
            .merged_env(step_env)
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();

        let steps = self
            .steps
            .iter()
            .map(|(id, state)| {
                (
                    id.clone(),
                    StepContext {
                        outcome: state.outcome.to_string(),
                        outputs: string_map_to_values(&state.outputs),
                    },
                )
            })
            .collect();

        let needs = self
            .needs
            .iter()
            .map(|(id, snapshot)| {
                (
                    id.clone(),
                    NeedsContext {
                        result: snapshot.result.clone(),
                        outputs: string_map_to_values(&snapshot.outputs),
                    },
                )
            })
            .collect();

        ExpressionContext {
            github: self.github.clone(),
            env,
            matrix: self.matrix.clone(),
            steps,
            needs,
            status: self.status,
        }
    }

    /// Evaluate an `if` expression to its truthiness.
    pub fn evaluate_condition(
        &self,
        source: &str,
        step_env: Option<&HashMap<String, String>>,
    ) -> Result<bool, ExpressionError> {
        let ctx = self.to_expression_context(step_env);
        Ok(evaluate(source, &ctx)?.is_truthy())
    }

    /// Interpolate every `${{ }}` marker in a string.
    pub fn render(
        &self,
        text: &str,
        step_env: Option<&HashMap<String, String>>,
    ) -> Result<String, ExpressionError> {
        let segments = extract_segments(text);
        if segments.len() == 1 {
            if let Segment::Text(t) = &segments[0] {
                return Ok(t.clone());
            }
        }

        let ctx = self.to_expression_context(step_env);
        let mut result = String::with_capacity(text.len());
        for segment in segments {
            match segment {
                Segment::Text(t) => result.push_str(&t),
                Segment::Expression(src) => {
                    result.push_str(&evaluate(&src, &ctx)?.as_string());
                }
            }
        }
        Ok(result)
    }
}

/// Environment every instance starts from, mirroring what a hosted
/// runner would seed.
fn default_env(workflow_name: Option<&str>, job_id: &str) -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert("CI".to_string(), "true".to_string());
    env.insert("GITHUB_ACTIONS".to_string(), "true".to_string());
    env.insert(
        "GITHUB_WORKFLOW".to_string(),
        workflow_name.unwrap_or_default().to_string(),
    );
    env.insert("GITHUB_JOB".to_string(), job_id.to_string());
    env.insert("RUNNER_OS".to_string(), "Linux".to_string());
    env
}

fn string_map_to_values(map: &HashMap<String, String>) -> HashMap<String, Value> {
    map.iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect()
}
