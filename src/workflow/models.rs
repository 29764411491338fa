use serde::Deserialize;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// A workflow definition as loaded from YAML.
///
/// Jobs are keyed by id; `BTreeMap` keeps iteration order stable so
/// scheduling and reporting are deterministic across runs.
#[derive(Debug, Clone, Deserialize)]
pub struct Workflow {
    /// The name of the workflow
    pub name: Option<String>,

    /// Trigger configuration (parsed but not evaluated locally)
    #[serde(default, rename = "on")]
    pub on: Option<Trigger>,

    /// Workflow-level environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// The jobs that make up this workflow
    pub jobs: BTreeMap<String, Job>,
}

/// Trigger configuration for when the workflow should run.
///
/// Supports the three YAML shapes: `on: push`, `on: [push, pull_request]`,
/// and the detailed mapping form.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Trigger {
    Single(String),
    Multiple(Vec<String>),
    Detailed(HashMap<String, serde_yaml::Value>),
}

/// A job within a workflow.
#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    /// Display name for the job
    #[serde(default)]
    pub name: Option<String>,

    /// Jobs that must complete before this job runs
    #[serde(default)]
    pub needs: JobNeeds,

    /// Runner label (parsed but ignored locally - always runs locally)
    #[serde(default, rename = "runs-on")]
    pub runs_on: Option<RunsOn>,

    /// Conditional expression for job execution
    #[serde(default, rename = "if")]
    pub if_condition: Option<String>,

    /// Job-level environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Job outputs to pass to dependent jobs
    #[serde(default)]
    pub outputs: HashMap<String, String>,

    /// Matrix strategy for running multiple job instances
    #[serde(default)]
    pub strategy: Option<Strategy>,

    /// The steps that make up this job
    #[serde(default)]
    pub steps: Vec<Step>,

    /// Job timeout in minutes
    #[serde(default, rename = "timeout-minutes")]
    pub timeout_minutes: Option<u64>,

    /// Whether a failure of this job should fail the overall run
    #[serde(default, rename = "continue-on-error")]
    pub continue_on_error: bool,
}

/// Job dependencies - can be a single string or a list.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(untagged)]
pub enum JobNeeds {
    #[default]
    None,
    Single(String),
    Multiple(Vec<String>),
}

impl JobNeeds {
    /// Convert to a vector of job IDs.
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            JobNeeds::None => vec![],
            JobNeeds::Single(s) => vec![s.clone()],
            JobNeeds::Multiple(v) => v.clone(),
        }
    }

    /// Check if there are any dependencies.
    pub fn is_empty(&self) -> bool {
        match self {
            JobNeeds::None => true,
            JobNeeds::Single(_) => false,
            JobNeeds::Multiple(v) => v.is_empty(),
        }
    }
}

/// Runner specification - can be a string or a list of labels.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RunsOn {
    /// Single runner label: `runs-on: ubuntu-latest`
    Label(String),

    /// Multiple labels: `runs-on: [self-hosted, linux]`
    Labels(Vec<String>),
}

/// Strategy configuration for matrix builds.
#[derive(Debug, Clone, Deserialize)]
pub struct Strategy {
    /// Matrix configuration
    #[serde(default)]
    pub matrix: Option<Matrix>,

    /// Whether to cancel remaining instances once one fails
    #[serde(default = "default_fail_fast", rename = "fail-fast")]
    pub fail_fast: bool,

    /// Maximum number of instances to run in parallel
    #[serde(default, rename = "max-parallel")]
    pub max_parallel: Option<u32>,
}

fn default_fail_fast() -> bool {
    true
}

/// Matrix configuration for expanding a job into multiple instances.
#[derive(Debug, Clone, Deserialize)]
pub struct Matrix {
    /// Matrix dimensions (dynamic keys)
    #[serde(flatten)]
    pub dimensions: HashMap<String, Vec<serde_json::Value>>,

    /// Additional matrix combinations to include
    #[serde(default)]
    pub include: Vec<HashMap<String, serde_json::Value>>,

    /// Matrix combinations to exclude
    #[serde(default)]
    pub exclude: Vec<HashMap<String, serde_json::Value>>,
}

/// A step within a job.
///
/// The `run`/`uses` polymorphism from the YAML is resolved into
/// [`StepAction`] when the document is deserialized; nothing downstream
/// re-inspects raw optional fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawStep")]
pub struct Step {
    /// Unique identifier for the step (used in outputs)
    pub id: Option<String>,

    /// Display name for the step
    pub name: Option<String>,

    /// Conditional expression for step execution
    pub if_condition: Option<String>,

    /// What the step does: shell command or action reference
    pub action: StepAction,

    /// Step-level environment variables
    pub env: HashMap<String, String>,

    /// Whether to continue the job if this step fails
    pub continue_on_error: bool,

    /// Step timeout in minutes
    pub timeout_minutes: Option<u64>,
}

/// The resolved action of a step.
#[derive(Debug, Clone)]
pub enum StepAction {
    /// Shell command: `run: cargo test`
    Shell {
        run: String,
        shell: Option<String>,
        working_directory: Option<String>,
    },

    /// Reusable action reference: `uses: actions/checkout@v4`
    ActionRef {
        uses: String,
        with: HashMap<String, serde_json::Value>,
    },
}

#[derive(Debug, Deserialize)]
struct RawStep {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "if")]
    if_condition: Option<String>,
    #[serde(default)]
    run: Option<String>,
    #[serde(default)]
    shell: Option<String>,
    #[serde(default, rename = "working-directory")]
    working_directory: Option<String>,
    #[serde(default)]
    uses: Option<String>,
    #[serde(default)]
    with: HashMap<String, serde_json::Value>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default, rename = "continue-on-error")]
    continue_on_error: bool,
    #[serde(default, rename = "timeout-minutes")]
    timeout_minutes: Option<u64>,
}

impl TryFrom<RawStep> for Step {
    type Error = String;

    fn try_from(raw: RawStep) -> Result<Self, Self::Error> {
        let action = match (raw.run, raw.uses) {
            (Some(run), None) => StepAction::Shell {
                run,
                shell: raw.shell,
                working_directory: raw.working_directory,
            },
            (None, Some(uses)) => StepAction::ActionRef {
                uses,
                with: raw.with,
            },
            (Some(_), Some(_)) => {
                return Err("step cannot have both `run` and `uses`".to_string());
            }
            (None, None) => {
                return Err("step must have either `run` or `uses`".to_string());
            }
        };

        Ok(Step {
            id: raw.id,
            name: raw.name,
            if_condition: raw.if_condition,
            action,
            env: raw.env,
            continue_on_error: raw.continue_on_error,
            timeout_minutes: raw.timeout_minutes,
        })
    }
}

impl Step {
    /// Get a display name for the step.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match &self.action {
            StepAction::ActionRef { uses, .. } => format!("Run {}", uses),
            StepAction::Shell { run, .. } => {
                let first_line = run.lines().next().unwrap_or(run);
                if first_line.chars().count() > 50 {
                    let head: String = first_line.chars().take(47).collect();
                    format!("{}...", head)
                } else {
                    format!("Run {}", first_line)
                }
            }
        }
    }
}

/// A runtime value produced by expression evaluation.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(HashMap<String, Value>),
}

impl Value {
    /// Truthiness for `if` gating: null, empty string, and false are
    /// falsy; everything else (including 0) is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Coerce to a number where possible.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Render as a string, the way interpolated `${{ }}` segments appear
    /// in commands. Whole numbers print without a trailing `.0`.
    pub fn as_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            Value::String(s) => s.clone(),
            Value::Array(_) | Value::Object(_) => self.to_json(),
        }
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.to_json_value()).unwrap_or_default()
    }

    /// Convert to a `serde_json::Value`.
    pub fn to_json_value(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(Value::to_json_value).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json_value()))
                    .collect(),
            ),
        }
    }

    /// Convert from a `serde_json::Value` (matrix dimensions, `with` inputs).
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(arr) => {
                Value::Array(arr.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_workflow() {
        let yaml = r#"
name: CI
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - run: echo "Hello, World!"
"#;
        let workflow: Workflow = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(workflow.name, Some("CI".to_string()));
        assert!(matches!(workflow.on, Some(Trigger::Single(ref s)) if s == "push"));
        assert!(workflow.jobs.contains_key("build"));
    }

    #[test]
    fn test_parse_job_with_needs() {
        let yaml = r#"
on: push
jobs:
  build:
    steps:
      - run: cargo build
  test:
    needs: build
    steps:
      - run: cargo test
  deploy:
    needs: [build, test]
    steps:
      - run: echo "Deploying"
"#;
        let workflow: Workflow = serde_yaml::from_str(yaml).unwrap();

        assert!(workflow.jobs["build"].needs.is_empty());
        assert_eq!(workflow.jobs["test"].needs.to_vec(), vec!["build"]);
        assert_eq!(
            workflow.jobs["deploy"].needs.to_vec(),
            vec!["build", "test"]
        );
    }

    #[test]
    fn test_parse_matrix_strategy() {
        let yaml = r#"
on: push
jobs:
  test:
    strategy:
      matrix:
        node: [16, 18, 20]
        os: [ubuntu-latest, macos-latest]
      max-parallel: 2
    steps:
      - run: echo "Testing"
"#;
        let workflow: Workflow = serde_yaml::from_str(yaml).unwrap();
        let strategy = workflow.jobs["test"].strategy.as_ref().unwrap();
        let matrix = strategy.matrix.as_ref().unwrap();

        assert!(matrix.dimensions.contains_key("node"));
        assert!(matrix.dimensions.contains_key("os"));
        assert!(strategy.fail_fast);
        assert_eq!(strategy.max_parallel, Some(2));
    }

    #[test]
    fn test_parse_step_actions() {
        let yaml = r#"
on: push
jobs:
  build:
    steps:
      - uses: actions/checkout@v4
      - uses: actions/setup-node@v4
        with:
          node-version: '20'
      - run: npm test
"#;
        let workflow: Workflow = serde_yaml::from_str(yaml).unwrap();
        let steps = &workflow.jobs["build"].steps;

        assert!(matches!(
            steps[0].action,
            StepAction::ActionRef { ref uses, .. } if uses == "actions/checkout@v4"
        ));
        if let StepAction::ActionRef { with, .. } = &steps[1].action {
            assert!(with.contains_key("node-version"));
        } else {
            panic!("expected action ref");
        }
        assert!(matches!(steps[2].action, StepAction::Shell { .. }));
    }

    #[test]
    fn test_step_requires_run_or_uses() {
        let yaml = r#"
on: push
jobs:
  build:
    steps:
      - name: does nothing
"#;
        let err = serde_yaml::from_str::<Workflow>(yaml).unwrap_err();
        assert!(err.to_string().contains("run"));
    }

    #[test]
    fn test_step_rejects_run_and_uses() {
        let yaml = r#"
on: push
jobs:
  build:
    steps:
      - run: echo hi
        uses: actions/checkout@v4
"#;
        assert!(serde_yaml::from_str::<Workflow>(yaml).is_err());
    }

    #[test]
    fn test_parse_env_at_all_levels() {
        let yaml = r#"
on: push
env:
  WORKFLOW_VAR: workflow
jobs:
  build:
    env:
      JOB_VAR: job
    steps:
      - run: echo "Hello"
        env:
          STEP_VAR: step
"#;
        let workflow: Workflow = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            workflow.env.get("WORKFLOW_VAR"),
            Some(&"workflow".to_string())
        );

        let job = &workflow.jobs["build"];
        assert_eq!(job.env.get("JOB_VAR"), Some(&"job".to_string()));
        assert_eq!(job.steps[0].env.get("STEP_VAR"), Some(&"step".to_string()));
    }

    #[test]
    fn test_step_display_name() {
        let yaml = r#"
on: push
jobs:
  build:
    steps:
      - name: Build project
        run: cargo build
      - uses: actions/checkout@v4
      - run: echo hello
"#;
        let workflow: Workflow = serde_yaml::from_str(yaml).unwrap();
        let steps = &workflow.jobs["build"].steps;

        assert_eq!(steps[0].display_name(), "Build project");
        assert_eq!(steps[1].display_name(), "Run actions/checkout@v4");
        assert_eq!(steps[2].display_name(), "Run echo hello");
    }

    #[test]
    fn test_step_display_name_truncates_multibyte_run_line() {
        let run = format!("echo {}é{}", "a".repeat(41), "x".repeat(10));
        let yaml = format!(
            "on: push\njobs:\n  build:\n    steps:\n      - run: {}\n",
            run
        );
        let workflow: Workflow = serde_yaml::from_str(&yaml).unwrap();
        let name = workflow.jobs["build"].steps[0].display_name();

        assert!(name.ends_with("..."));
        assert_eq!(name.chars().count(), 50);
        assert!(name.contains('é'));
    }

    #[test]
    fn test_value_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::String(String::new()).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(Value::Number(0.0).is_truthy());
        assert!(Value::String("no".to_string()).is_truthy());
        assert!(Value::Array(vec![]).is_truthy());
    }

    #[test]
    fn test_value_as_string() {
        assert_eq!(Value::Number(18.0).as_string(), "18");
        assert_eq!(Value::Number(3.5).as_string(), "3.5");
        assert_eq!(Value::Bool(true).as_string(), "true");
        assert_eq!(Value::Null.as_string(), "");
    }
}
