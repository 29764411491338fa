// Workflow Executor
// The dispatch loop: drives job instances from pending to terminal,
// respecting `needs` edges, matrix strategy, and `if` gates

use crate::execution::context::{InstanceContext, NeedsSnapshot, Outcome};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::graph::{aggregate_needs, ExecutionGraph, GraphError};
use crate::execution::report::{InstanceReport, RunSummary, StepRecord};
use crate::expression::parser::Expr;
use crate::expression::{Evaluator, StatusContext};
use crate::runner::{StepExecution, StepOutcome, StepRunner};
use crate::workflow::models::{Job, Step, StepAction, Workflow};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Knobs for a run. The defaults run every job with no timeouts and an
/// empty seed environment.
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    /// Run only this job and its transitive dependencies
    pub job_filter: Option<String>,
    /// Applied to steps that declare no `timeout-minutes` of their own
    pub default_step_timeout: Option<Duration>,
    /// Seeds the bottom env layer of every instance
    pub initial_env: HashMap<String, String>,
}

/// Executes a workflow against a [`StepRunner`].
pub struct WorkflowExecutor {
    runner: Arc<dyn StepRunner>,
    config: ExecutorConfig,
    event_tx: Option<ProgressSender>,
}

/// Terminal state of one instance, as collected by the dispatch loop.
#[derive(Debug, Clone)]
struct InstanceResult {
    outcome: Outcome,
    duration: Duration,
    steps: Vec<StepRecord>,
    outputs: HashMap<String, String>,
}

impl InstanceResult {
    /// An instance that never ran: no steps, zero duration.
    fn without_running(outcome: Outcome) -> Self {
        Self {
            outcome,
            duration: Duration::ZERO,
            steps: Vec::new(),
            outputs: HashMap::new(),
        }
    }
}

/// What an `if` gate decided.
enum GateDecision {
    Run,
    Skip,
    /// The expression was malformed or failed to evaluate - fatal for
    /// this job/step only, never for the whole run
    Fail(String),
}

impl WorkflowExecutor {
    pub fn new(runner: Arc<dyn StepRunner>) -> Self {
        Self {
            runner,
            config: ExecutorConfig::default(),
            event_tx: None,
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_progress(mut self, sender: ProgressSender) -> Self {
        self.event_tx = Some(sender);
        self
    }

    /// Run the workflow to completion and return the summary.
    ///
    /// Graph-build errors abort before anything executes. Every other
    /// kind of failure is contained per instance or per step and still
    /// produces a full summary.
    pub async fn execute(&self, workflow: &Workflow) -> Result<RunSummary, GraphError> {
        let started = Instant::now();

        let mut graph = ExecutionGraph::build(workflow)?;
        if let Some(filter) = &self.config.job_filter {
            graph.restrict_to(filter)?;
        }

        self.event_tx.send_event(ExecutionEvent::run_started(
            workflow.name.clone(),
            graph.jobs.len(),
        ));

        // One slot per instance, filled as instances terminate
        let mut results: HashMap<String, Vec<Option<InstanceResult>>> = graph
            .jobs
            .iter()
            .map(|j| (j.id.clone(), vec![None; j.instances.len()]))
            .collect();
        let mut remaining: usize = graph.jobs.iter().map(|j| j.instances.len()).sum();
        let mut dispatched: HashSet<String> = HashSet::new();

        let (done_tx, mut done_rx) =
            mpsc::unbounded_channel::<(String, usize, InstanceResult)>();

        while remaining > 0 {
            // Dispatch to a fixpoint: instances resolved without running
            // (skipped, gate errors) can unblock further jobs immediately
            loop {
                let mut progressed = false;
                for node in &graph.jobs {
                    if dispatched.contains(&node.id) {
                        continue;
                    }
                    let eligible = node.needs.iter().all(|needed| {
                        results[needed].iter().all(|slot| slot.is_some())
                    });
                    if !eligible {
                        continue;
                    }
                    dispatched.insert(node.id.clone());
                    progressed = true;

                    let snapshots = self.snapshot_needs(workflow, &node.needs, &results);
                    let job = &workflow.jobs[&node.id];
                    let cancel_flag = Arc::new(AtomicBool::new(false));
                    let semaphore = node
                        .max_parallel
                        .map(|n| Arc::new(Semaphore::new(n.max(1) as usize)));

                    for (index, instance) in node.instances.iter().enumerate() {
                        let ctx = InstanceContext::new(
                            workflow,
                            &node.id,
                            job,
                            instance.values.clone(),
                            snapshots.clone(),
                            &self.config.initial_env,
                        );

                        match evaluate_gate(job.if_condition.as_deref(), &ctx, None) {
                            GateDecision::Run => {}
                            GateDecision::Skip => {
                                debug!(job = %node.id, instance = %instance.name, "skipping instance");
                                self.event_tx.send_event(ExecutionEvent::job_skipped(
                                    &node.id,
                                    &instance.name,
                                    Outcome::Skipped,
                                    "condition evaluated to false",
                                ));
                                let _ = done_tx.send((
                                    node.id.clone(),
                                    index,
                                    InstanceResult::without_running(Outcome::Skipped),
                                ));
                                continue;
                            }
                            GateDecision::Fail(message) => {
                                warn!(job = %node.id, instance = %instance.name, %message, "job condition failed");
                                self.event_tx.send_event(ExecutionEvent::job_skipped(
                                    &node.id,
                                    &instance.name,
                                    Outcome::Failure,
                                    message,
                                ));
                                let _ = done_tx.send((
                                    node.id.clone(),
                                    index,
                                    InstanceResult::without_running(Outcome::Failure),
                                ));
                                continue;
                            }
                        }

                        let task = InstanceTask {
                            runner: Arc::clone(&self.runner),
                            job: job.clone(),
                            job_id: node.id.clone(),
                            instance_name: instance.name.clone(),
                            ctx,
                            fail_fast: node.fail_fast,
                            cancel_flag: Arc::clone(&cancel_flag),
                            semaphore: semaphore.clone(),
                            default_step_timeout: self.config.default_step_timeout,
                            event_tx: self.event_tx.clone(),
                        };
                        let tx = done_tx.clone();
                        let job_id = node.id.clone();
                        tokio::spawn(async move {
                            let result = task.run().await;
                            let _ = tx.send((job_id, index, result));
                        });
                    }
                }
                if !progressed {
                    break;
                }
            }

            // The channel cannot close while we hold done_tx, and a
            // validated DAG guarantees something is always in flight
            let Some((job_id, index, result)) = done_rx.recv().await else {
                break;
            };
            if let Some(slot) = results
                .get_mut(&job_id)
                .and_then(|slots| slots.get_mut(index))
            {
                *slot = Some(result);
                remaining -= 1;
            }
        }

        let summary = self.summarize(workflow, &graph, results, started.elapsed());
        self.event_tx.send_event(ExecutionEvent::run_completed(
            workflow.name.clone(),
            summary.overall,
            summary.total_duration,
        ));
        Ok(summary)
    }

    /// Aggregate each dependency's instance results into the frozen
    /// `needs.<job>` view for a newly eligible job.
    fn snapshot_needs(
        &self,
        workflow: &Workflow,
        needs: &[String],
        results: &HashMap<String, Vec<Option<InstanceResult>>>,
    ) -> HashMap<String, NeedsSnapshot> {
        needs
            .iter()
            .map(|needed| {
                let outcomes: Vec<(Outcome, HashMap<String, String>)> = results[needed]
                    .iter()
                    .flatten()
                    .map(|r| (r.outcome, r.outputs.clone()))
                    .collect();
                let continue_on_error = workflow
                    .jobs
                    .get(needed)
                    .map(|j| j.continue_on_error)
                    .unwrap_or(false);
                (needed.clone(), aggregate_needs(&outcomes, continue_on_error))
            })
            .collect()
    }

    fn summarize(
        &self,
        workflow: &Workflow,
        graph: &ExecutionGraph,
        mut results: HashMap<String, Vec<Option<InstanceResult>>>,
        total_duration: Duration,
    ) -> RunSummary {
        let mut instances = Vec::new();
        for node in &graph.jobs {
            let continue_on_error = workflow
                .jobs
                .get(&node.id)
                .map(|j| j.continue_on_error)
                .unwrap_or(false);
            let slots = results.remove(&node.id).unwrap_or_default();
            for (instance, slot) in node.instances.iter().zip(slots) {
                let result =
                    slot.unwrap_or_else(|| InstanceResult::without_running(Outcome::Cancelled));
                instances.push(InstanceReport {
                    job_id: node.id.clone(),
                    instance_name: instance.name.clone(),
                    outcome: result.outcome,
                    duration: result.duration,
                    continue_on_error,
                    steps: result.steps,
                    outputs: result.outputs,
                });
            }
        }
        RunSummary::new(workflow.name.clone(), total_duration, instances)
    }
}

/// Evaluate an `if` gate against the instance context.
///
/// A missing condition carries implicit `success()` semantics: run
/// unless a dependency (or an earlier step) failed or was cancelled. An
/// explicit condition without a status function keeps that implicit
/// gate and is additionally required to be truthy; a condition that
/// names a status function (`always()`, `failure()`, ...) replaces the
/// implicit gate entirely.
fn evaluate_gate(
    condition: Option<&str>,
    ctx: &InstanceContext,
    step_env: Option<&HashMap<String, String>>,
) -> GateDecision {
    let healthy = !ctx.status.failure && !ctx.status.cancelled;

    let Some(source) = condition else {
        return if healthy {
            GateDecision::Run
        } else {
            GateDecision::Skip
        };
    };

    let ast = match Expr::parse(source) {
        Ok(ast) => ast,
        Err(e) => return GateDecision::Fail(e.to_string()),
    };

    if !ast.contains_status_function() && !healthy {
        return GateDecision::Skip;
    }

    let expr_ctx = ctx.to_expression_context(step_env);
    match Evaluator::new(&expr_ctx).eval(&ast) {
        Ok(value) if value.is_truthy() => GateDecision::Run,
        Ok(_) => GateDecision::Skip,
        Err(e) => GateDecision::Fail(e.to_string()),
    }
}

/// One spawned job instance: acquires its matrix slot, runs its steps
/// in declaration order, and reports a terminal result.
struct InstanceTask {
    runner: Arc<dyn StepRunner>,
    job: Job,
    job_id: String,
    instance_name: String,
    ctx: InstanceContext,
    fail_fast: bool,
    cancel_flag: Arc<AtomicBool>,
    semaphore: Option<Arc<Semaphore>>,
    default_step_timeout: Option<Duration>,
    event_tx: Option<ProgressSender>,
}

impl InstanceTask {
    async fn run(mut self) -> InstanceResult {
        // max-parallel slot, held for the lifetime of the instance
        let _permit = match &self.semaphore {
            Some(semaphore) => Arc::clone(semaphore).acquire_owned().await.ok(),
            None => None,
        };

        // A sibling may have failed while this instance queued
        if self.cancel_flag.load(Ordering::SeqCst) {
            self.event_tx.send_event(ExecutionEvent::job_skipped(
                &self.job_id,
                &self.instance_name,
                Outcome::Cancelled,
                "cancelled by fail-fast",
            ));
            return InstanceResult::without_running(Outcome::Cancelled);
        }

        // The job gate already consumed the dependency state; inside the
        // instance, status functions track this job's own steps
        self.ctx.status = StatusContext::default();

        self.event_tx.send_event(ExecutionEvent::job_started(
            &self.job_id,
            &self.instance_name,
            self.job.steps.len(),
        ));

        let job_timeout = self.job.timeout_minutes.map(minutes);
        let result = match job_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.run_steps()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(job = %self.job_id, instance = %self.instance_name, "job timed out");
                    InstanceResult {
                        outcome: Outcome::Failure,
                        duration: limit,
                        steps: Vec::new(),
                        outputs: HashMap::new(),
                    }
                }
            },
            None => self.run_steps().await,
        };

        if result.outcome == Outcome::Failure && self.fail_fast && !self.job.continue_on_error {
            self.cancel_flag.store(true, Ordering::SeqCst);
        }

        self.event_tx.send_event(ExecutionEvent::job_completed(
            &self.job_id,
            &self.instance_name,
            result.outcome,
            result.duration,
        ));
        result
    }

    async fn run_steps(&mut self) -> InstanceResult {
        let mut records = Vec::new();
        let mut duration = Duration::ZERO;
        let mut failed = false;

        let steps = self.job.steps.clone();
        for (index, step) in steps.iter().enumerate() {
            let name = step.display_name();

            // Render the env overlay before gating so the gate sees the
            // same env the step would
            let step_env = match self.render_env(step) {
                Ok(env) => env,
                Err(message) => {
                    warn!(job = %self.job_id, step = %name, %message, "step env failed to render");
                    records.push(StepRecord {
                        name,
                        outcome: Outcome::Failure,
                        duration: Duration::ZERO,
                    });
                    failed = self.record_failure(step, failed);
                    continue;
                }
            };

            match evaluate_gate(step.if_condition.as_deref(), &self.ctx, Some(&step_env)) {
                GateDecision::Run => {}
                GateDecision::Skip => {
                    self.event_tx.send_event(ExecutionEvent::step_skipped(
                        &self.job_id,
                        &self.instance_name,
                        &name,
                        index,
                        "condition evaluated to false",
                    ));
                    if let Some(id) = &step.id {
                        self.ctx.set_outcome(id, Outcome::Skipped);
                    }
                    records.push(StepRecord {
                        name,
                        outcome: Outcome::Skipped,
                        duration: Duration::ZERO,
                    });
                    continue;
                }
                GateDecision::Fail(message) => {
                    warn!(job = %self.job_id, step = %name, %message, "step condition failed");
                    if let Some(id) = &step.id {
                        self.ctx.set_outcome(id, Outcome::Failure);
                    }
                    records.push(StepRecord {
                        name,
                        outcome: Outcome::Failure,
                        duration: Duration::ZERO,
                    });
                    failed = self.record_failure(step, failed);
                    continue;
                }
            }

            self.event_tx.send_event(ExecutionEvent::step_started(
                &self.job_id,
                &self.instance_name,
                &name,
                index,
            ));

            let (outcome, step_duration) = self.run_step(step, &step_env).await;
            duration += step_duration;

            if let Some(id) = &step.id {
                self.ctx.set_outcome(id, outcome);
            }
            if outcome == Outcome::Failure {
                failed = self.record_failure(step, failed);
            }

            self.event_tx.send_event(ExecutionEvent::step_completed(
                &self.job_id,
                &self.instance_name,
                &name,
                index,
                outcome,
                step_duration,
            ));
            records.push(StepRecord {
                name,
                outcome,
                duration: step_duration,
            });
        }

        InstanceResult {
            outcome: if failed {
                Outcome::Failure
            } else {
                Outcome::Success
            },
            duration,
            steps: records,
            outputs: self.render_job_outputs(),
        }
    }

    /// Dispatch one step to the runner, honoring its timeout.
    async fn run_step(
        &mut self,
        step: &Step,
        step_env: &HashMap<String, String>,
    ) -> (Outcome, Duration) {
        let command = match &step.action {
            StepAction::Shell { run, .. } => match self.ctx.render(run, Some(step_env)) {
                Ok(rendered) => Some(rendered),
                Err(e) => {
                    warn!(job = %self.job_id, error = %e, "step command failed to render");
                    return (Outcome::Failure, Duration::ZERO);
                }
            },
            StepAction::ActionRef { .. } => None,
        };

        let execution = StepExecution {
            job_id: self.job_id.clone(),
            instance_name: self.instance_name.clone(),
            env: self.ctx.merged_env(Some(step_env)),
            command,
        };

        let limit = step
            .timeout_minutes
            .map(minutes)
            .or(self.default_step_timeout);
        let outcome = match limit {
            Some(limit) => match tokio::time::timeout(limit, self.runner.run_step(step, &execution)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(job = %self.job_id, instance = %self.instance_name, "step timed out");
                    return (Outcome::Failure, limit);
                }
            },
            None => self.runner.run_step(step, &execution).await,
        };

        match outcome {
            Ok(report) => {
                if let Some(id) = &step.id {
                    for (key, value) in &report.outputs {
                        self.ctx.set_output(id, key, value);
                    }
                }
                let outcome = match report.outcome {
                    StepOutcome::Success => Outcome::Success,
                    StepOutcome::Failure => Outcome::Failure,
                };
                (outcome, report.duration)
            }
            Err(e) => {
                // Runner faults become step failures, never run-fatal
                warn!(job = %self.job_id, instance = %self.instance_name, error = %e, "runner error");
                (Outcome::Failure, Duration::ZERO)
            }
        }
    }

    /// A failing step fails the instance unless it carries
    /// `continue-on-error`; either way later default-gated steps see the
    /// failure through the status context.
    fn record_failure(&mut self, step: &Step, already_failed: bool) -> bool {
        if step.continue_on_error {
            already_failed
        } else {
            self.ctx.status.failure = true;
            true
        }
    }

    fn render_env(&self, step: &Step) -> Result<HashMap<String, String>, String> {
        let mut env = HashMap::new();
        for (key, template) in &step.env {
            let value = self
                .ctx
                .render(template, None)
                .map_err(|e| e.to_string())?;
            env.insert(key.clone(), value);
        }
        Ok(env)
    }

    /// Render the job's declared outputs against the finished context.
    /// A value that fails to render is dropped with a warning; the rest
    /// still publish.
    fn render_job_outputs(&self) -> HashMap<String, String> {
        let mut outputs = HashMap::new();
        for (key, template) in &self.job.outputs {
            match self.ctx.render(template, None) {
                Ok(value) => {
                    outputs.insert(key.clone(), value);
                }
                Err(e) => {
                    warn!(job = %self.job_id, output = %key, error = %e, "job output failed to render");
                }
            }
        }
        outputs
    }
}

fn minutes(m: u64) -> Duration {
    Duration::from_secs(m * 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{SimulatedRunner, StepExecutionError, StepReport};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every dispatched command; fails commands containing
    /// `fail`, produces outputs for `set-output k=v` commands.
    #[derive(Default)]
    struct ScriptedRunner {
        log: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StepRunner for ScriptedRunner {
        async fn run_step(
            &self,
            _step: &Step,
            execution: &StepExecution,
        ) -> Result<StepReport, StepExecutionError> {
            let command = execution.command.clone().unwrap_or_default();
            self.log
                .lock()
                .unwrap()
                .push(format!("{}: {}", execution.instance_name, command));

            if command.contains("fail") {
                return Ok(StepReport::failure());
            }
            if let Some(rest) = command.strip_prefix("set-output ") {
                let (key, value) = rest.split_once('=').unwrap_or((rest, ""));
                return Ok(StepReport::success().with_output(key, value));
            }
            Ok(StepReport::success())
        }
    }

    /// Never returns; only a timeout gets past it.
    struct HangingRunner;

    #[async_trait]
    impl StepRunner for HangingRunner {
        async fn run_step(
            &self,
            _step: &Step,
            _execution: &StepExecution,
        ) -> Result<StepReport, StepExecutionError> {
            tokio::time::sleep(Duration::from_secs(86_400)).await;
            Ok(StepReport::success())
        }
    }

    fn workflow(yaml: &str) -> Workflow {
        serde_yaml::from_str(yaml).unwrap()
    }

    async fn run_with(
        runner: Arc<ScriptedRunner>,
        yaml: &str,
    ) -> RunSummary {
        WorkflowExecutor::new(runner)
            .execute(&workflow(yaml))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_needs_ordering() {
        let runner = Arc::new(ScriptedRunner::default());
        let summary = run_with(
            Arc::clone(&runner),
            r#"
name: CI
on: push
jobs:
  build:
    steps:
      - run: compile
  test:
    needs: build
    steps:
      - run: check
  deploy:
    needs: [build, test]
    steps:
      - run: ship
"#,
        )
        .await;

        assert!(summary.succeeded());
        let log = runner.log();
        let pos = |cmd: &str| log.iter().position(|l| l.contains(cmd)).unwrap();
        assert!(pos("compile") < pos("check"));
        assert!(pos("check") < pos("ship"));
    }

    #[tokio::test]
    async fn test_outputs_flow_through_needs() {
        let runner = Arc::new(ScriptedRunner::default());
        let summary = run_with(
            Arc::clone(&runner),
            r#"
on: push
jobs:
  release:
    outputs:
      version: ${{ steps.ver.outputs.value }}
    steps:
      - id: ver
        run: set-output value=1.2.3
  announce:
    needs: release
    steps:
      - run: post ${{ needs.release.outputs.version }}
"#,
        )
        .await;

        assert!(summary.succeeded());
        assert_eq!(summary.instance("release").unwrap().outputs["version"], "1.2.3");
        assert!(runner.log().iter().any(|l| l.contains("post 1.2.3")));
    }

    #[tokio::test]
    async fn test_failure_skips_dependents() {
        let runner = Arc::new(ScriptedRunner::default());
        let summary = run_with(
            Arc::clone(&runner),
            r#"
on: push
jobs:
  build:
    steps:
      - run: fail now
  test:
    needs: build
    steps:
      - run: check
  cleanup:
    needs: build
    if: always()
    steps:
      - run: sweep
"#,
        )
        .await;

        assert_eq!(summary.overall, Outcome::Failure);
        assert_eq!(summary.instance("build").unwrap().outcome, Outcome::Failure);
        assert_eq!(summary.instance("test").unwrap().outcome, Outcome::Skipped);
        // always() overrides the implicit success() gate
        assert_eq!(summary.instance("cleanup").unwrap().outcome, Outcome::Success);
        assert!(!runner.log().iter().any(|l| l.contains("check")));
        assert!(runner.log().iter().any(|l| l.contains("sweep")));
    }

    #[tokio::test]
    async fn test_failure_gated_job_skipped_on_success() {
        let runner = Arc::new(ScriptedRunner::default());
        let summary = run_with(
            Arc::clone(&runner),
            r#"
on: push
jobs:
  build:
    steps:
      - run: compile
  alert:
    needs: build
    if: failure()
    steps:
      - run: page someone
  after:
    needs: alert
    steps:
      - run: tail
"#,
        )
        .await;

        assert!(summary.succeeded());
        assert_eq!(summary.instance("alert").unwrap().outcome, Outcome::Skipped);
        // A skipped dependency is terminal and does not block dependents
        assert_eq!(summary.instance("after").unwrap().outcome, Outcome::Success);
    }

    #[tokio::test]
    async fn test_fail_fast_cancels_pending_siblings() {
        let runner = Arc::new(ScriptedRunner::default());
        let summary = run_with(
            Arc::clone(&runner),
            r#"
on: push
jobs:
  test:
    strategy:
      matrix:
        os: [a, b]
        ver: [1, 2]
      max-parallel: 1
    steps:
      - run: fail ${{ matrix.os }}-${{ matrix.ver }}
"#,
        )
        .await;

        // max-parallel 1 serializes the matrix, so exactly one instance
        // runs before the cancel flag stops the rest
        assert_eq!(summary.count(Outcome::Failure), 1);
        assert_eq!(summary.count(Outcome::Cancelled), 3);
        assert_eq!(summary.overall, Outcome::Failure);
    }

    #[tokio::test]
    async fn test_fail_fast_disabled_runs_all_instances() {
        let runner = Arc::new(ScriptedRunner::default());
        let summary = run_with(
            Arc::clone(&runner),
            r#"
on: push
jobs:
  test:
    strategy:
      fail-fast: false
      matrix:
        os: [a, b]
        ver: [1, 2]
    steps:
      - run: fail ${{ matrix.os }}-${{ matrix.ver }}
"#,
        )
        .await;

        assert_eq!(summary.count(Outcome::Failure), 4);
        assert_eq!(summary.count(Outcome::Cancelled), 0);
    }

    #[tokio::test]
    async fn test_matrix_values_render_into_commands() {
        let runner = Arc::new(ScriptedRunner::default());
        let summary = run_with(
            Arc::clone(&runner),
            r#"
on: push
jobs:
  test:
    strategy:
      matrix:
        os: [linux, macos]
    steps:
      - run: build-on ${{ matrix.os }}
"#,
        )
        .await;

        assert!(summary.succeeded());
        let log = runner.log();
        assert!(log.iter().any(|l| l.contains("build-on linux")));
        assert!(log.iter().any(|l| l.contains("build-on macos")));
        assert!(summary.instance("test (linux)").is_some());
    }

    #[tokio::test]
    async fn test_continue_on_error_job_does_not_fail_run() {
        let runner = Arc::new(ScriptedRunner::default());
        let summary = run_with(
            Arc::clone(&runner),
            r#"
on: push
jobs:
  build:
    steps:
      - run: compile
  nightly:
    continue-on-error: true
    steps:
      - run: fail probes
  downstream:
    needs: nightly
    steps:
      - run: proceed
"#,
        )
        .await;

        assert!(summary.succeeded());
        assert_eq!(summary.instance("nightly").unwrap().outcome, Outcome::Failure);
        // The masked failure does not gate dependents either
        assert_eq!(summary.instance("downstream").unwrap().outcome, Outcome::Success);
    }

    #[tokio::test]
    async fn test_step_failure_gates_later_steps() {
        let runner = Arc::new(ScriptedRunner::default());
        let summary = run_with(
            Arc::clone(&runner),
            r#"
on: push
jobs:
  build:
    steps:
      - run: fail early
      - run: never runs
      - if: always()
        run: cleanup
"#,
        )
        .await;

        let instance = summary.instance("build").unwrap();
        assert_eq!(instance.outcome, Outcome::Failure);
        assert_eq!(instance.steps[0].outcome, Outcome::Failure);
        assert_eq!(instance.steps[1].outcome, Outcome::Skipped);
        assert_eq!(instance.steps[2].outcome, Outcome::Success);
        assert!(!runner.log().iter().any(|l| l.contains("never runs")));
        assert!(runner.log().iter().any(|l| l.contains("cleanup")));
    }

    #[tokio::test]
    async fn test_step_continue_on_error_keeps_job_green() {
        let runner = Arc::new(ScriptedRunner::default());
        let summary = run_with(
            Arc::clone(&runner),
            r#"
on: push
jobs:
  build:
    steps:
      - run: fail flaky
        continue-on-error: true
      - run: still here
"#,
        )
        .await;

        assert!(summary.succeeded());
        assert!(runner.log().iter().any(|l| l.contains("still here")));
    }

    #[tokio::test]
    async fn test_bad_job_condition_fails_instance_only() {
        let runner = Arc::new(ScriptedRunner::default());
        let summary = run_with(
            Arc::clone(&runner),
            r#"
on: push
jobs:
  broken:
    if: matrix.os ==
    steps:
      - run: unreachable
  fine:
    steps:
      - run: compile
"#,
        )
        .await;

        assert_eq!(summary.instance("broken").unwrap().outcome, Outcome::Failure);
        assert_eq!(summary.instance("fine").unwrap().outcome, Outcome::Success);
        assert!(!runner.log().iter().any(|l| l.contains("unreachable")));
    }

    #[tokio::test]
    async fn test_cycle_aborts_before_execution() {
        let runner = Arc::new(ScriptedRunner::default());
        let executor = WorkflowExecutor::new(Arc::clone(&runner) as Arc<dyn StepRunner>);
        let result = executor
            .execute(&workflow(
                r#"
on: push
jobs:
  a:
    needs: b
    steps:
      - run: echo a
  b:
    needs: a
    steps:
      - run: echo b
"#,
            ))
            .await;

        assert!(matches!(result, Err(GraphError::Cycle { .. })));
        assert!(runner.log().is_empty());
    }

    #[tokio::test]
    async fn test_job_filter_restricts_run() {
        let runner = Arc::new(ScriptedRunner::default());
        let executor = WorkflowExecutor::new(Arc::clone(&runner) as Arc<dyn StepRunner>)
            .with_config(ExecutorConfig {
                job_filter: Some("test".to_string()),
                ..Default::default()
            });
        let summary = executor
            .execute(&workflow(
                r#"
on: push
jobs:
  build:
    steps:
      - run: compile
  test:
    needs: build
    steps:
      - run: check
  lint:
    steps:
      - run: style
"#,
            ))
            .await
            .unwrap();

        assert_eq!(summary.instances.len(), 2);
        assert!(summary.instance("lint").is_none());
        assert!(!runner.log().iter().any(|l| l.contains("style")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_timeout_fails_instance() {
        let executor = WorkflowExecutor::new(Arc::new(HangingRunner));
        let summary = executor
            .execute(&workflow(
                r#"
on: push
jobs:
  slow:
    steps:
      - run: spin
        timeout-minutes: 1
"#,
            ))
            .await
            .unwrap();

        assert_eq!(summary.instance("slow").unwrap().outcome, Outcome::Failure);
        assert_eq!(summary.overall, Outcome::Failure);
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_timeout_fails_instance() {
        let executor = WorkflowExecutor::new(Arc::new(HangingRunner));
        let summary = executor
            .execute(&workflow(
                r#"
on: push
jobs:
  slow:
    timeout-minutes: 2
    steps:
      - run: spin
"#,
            ))
            .await
            .unwrap();

        assert_eq!(summary.instance("slow").unwrap().outcome, Outcome::Failure);
    }

    #[tokio::test]
    async fn test_initial_env_seeds_bottom_layer() {
        let runner = Arc::new(ScriptedRunner::default());
        let executor = WorkflowExecutor::new(Arc::clone(&runner) as Arc<dyn StepRunner>)
            .with_config(ExecutorConfig {
                initial_env: [("DEPLOY_TARGET".to_string(), "staging".to_string())].into(),
                ..Default::default()
            });
        let summary = executor
            .execute(&workflow(
                r#"
on: push
jobs:
  deploy:
    steps:
      - run: ship to ${{ env.DEPLOY_TARGET }}
"#,
            ))
            .await
            .unwrap();

        assert!(summary.succeeded());
        assert!(runner.log().iter().any(|l| l.contains("ship to staging")));
    }

    #[tokio::test]
    async fn test_progress_events() {
        let (tx, mut rx) = crate::execution::events::progress_channel();
        let executor = WorkflowExecutor::new(Arc::new(SimulatedRunner)).with_progress(tx);
        let summary = executor
            .execute(&workflow(
                "name: CI\non: push\njobs:\n  build:\n    steps:\n      - run: echo hi\n",
            ))
            .await
            .unwrap();
        assert!(summary.succeeded());

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                ExecutionEvent::RunStarted { .. } => "run_started",
                ExecutionEvent::RunCompleted { .. } => "run_completed",
                ExecutionEvent::JobStarted { .. } => "job_started",
                ExecutionEvent::JobCompleted { .. } => "job_completed",
                ExecutionEvent::StepStarted { .. } => "step_started",
                ExecutionEvent::StepCompleted { .. } => "step_completed",
                _ => "other",
            });
        }
        assert_eq!(
            kinds,
            vec![
                "run_started",
                "job_started",
                "step_started",
                "step_completed",
                "job_completed",
                "run_completed",
            ]
        );
    }
}
