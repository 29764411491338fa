// Workflow Module
// Typed workflow model and YAML loading

pub mod loader;
pub mod models;

pub use loader::{load_path, load_str, LoadError};
pub use models::{
    Job, JobNeeds, Matrix, RunsOn, Step, StepAction, Strategy, Trigger, Value, Workflow,
};
