// GitHub Actions Workflow Simulator
// Local, dependency-aware execution of workflow definitions

pub mod execution;
pub mod expression;
pub mod runner;
pub mod workflow;

// Re-export commonly used types
pub use execution::{
    progress_channel, ExecutionEvent, ExecutionGraph, ExecutorConfig, GraphError, InstanceReport,
    Outcome, ProgressReceiver, ProgressSender, RunSummary, WorkflowExecutor,
};

// Re-export expression types
pub use expression::{evaluate, EvalError, ExpressionContext, ExpressionError, SyntaxError};

// Re-export runner types
pub use runner::{
    SimulatedRunner, StepExecution, StepExecutionError, StepOutcome, StepReport, StepRunner,
};

// Re-export workflow types
pub use workflow::{load_path, load_str, Job, LoadError, Step, StepAction, Value, Workflow};
