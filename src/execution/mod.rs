// Execution Module
// Graph building, matrix expansion, scheduling, and reporting

pub mod context;
pub mod events;
pub mod executor;
pub mod graph;
pub mod matrix;
pub mod report;

pub use context::{InstanceContext, NeedsSnapshot, Outcome, StepState};
pub use events::{
    progress_channel, EventSender, ExecutionEvent, ProgressReceiver, ProgressSender,
};
pub use executor::{ExecutorConfig, WorkflowExecutor};
pub use graph::{aggregate_needs, ExecutionGraph, GraphError, JobNode};
pub use matrix::{expand, MatrixInstance};
pub use report::{InstanceReport, RunSummary, StepRecord};
