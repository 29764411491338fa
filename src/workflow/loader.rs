// Workflow Loader
// Reads workflow YAML and validates the document shape before execution

use crate::workflow::models::Workflow;

use std::collections::HashSet;
use std::path::Path;

use thiserror::Error;

/// Errors raised while loading a workflow file.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read workflow file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid workflow YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid workflow: {0}")]
    Validation(String),
}

/// Load and validate a workflow from a YAML string.
pub fn load_str(content: &str) -> Result<Workflow, LoadError> {
    let workflow: Workflow = serde_yaml::from_str(content)?;
    validate(&workflow)?;
    Ok(workflow)
}

/// Load and validate a workflow from a file path.
pub fn load_path(path: impl AsRef<Path>) -> Result<Workflow, LoadError> {
    let content = std::fs::read_to_string(path)?;
    load_str(&content)
}

/// Structural validation beyond what deserialization enforces.
///
/// Graph-level checks (unknown `needs` targets, cycles) are performed by
/// the graph builder; this only checks each job in isolation.
fn validate(workflow: &Workflow) -> Result<(), LoadError> {
    if workflow.jobs.is_empty() {
        return Err(LoadError::Validation(
            "workflow has no jobs".to_string(),
        ));
    }

    for (job_id, job) in &workflow.jobs {
        if job.steps.is_empty() {
            return Err(LoadError::Validation(format!(
                "job `{}` has no steps",
                job_id
            )));
        }

        let mut seen_ids = HashSet::new();
        for step in &job.steps {
            if let Some(id) = &step.id {
                if !seen_ids.insert(id.as_str()) {
                    return Err(LoadError::Validation(format!(
                        "job `{}` has duplicate step id `{}`",
                        job_id, id
                    )));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    #[test]
    fn test_load_valid_workflow() {
        let workflow = load_str(
            r#"
name: CI
on: push
jobs:
  build:
    steps:
      - run: cargo build
"#,
        )
        .unwrap();
        assert_eq!(workflow.name, Some("CI".to_string()));
    }

    #[test]
    fn test_load_rejects_empty_jobs() {
        let err = load_str("name: CI\non: push\njobs: {}\n").unwrap_err();
        assert!(matches!(err, LoadError::Validation(_)));
    }

    #[test]
    fn test_load_rejects_job_without_steps() {
        let err = load_str(
            r#"
on: push
jobs:
  build:
    steps: []
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("no steps"));
    }

    #[test]
    fn test_load_rejects_duplicate_step_ids() {
        let err = load_str(
            r#"
on: push
jobs:
  build:
    steps:
      - id: out
        run: echo one
      - id: out
        run: echo two
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate step id"));
    }

    #[test]
    fn test_load_rejects_bad_yaml() {
        let err = load_str("jobs: [not a mapping").unwrap_err();
        assert!(matches!(err, LoadError::Yaml(_)));
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "name: FromDisk\non: push\njobs:\n  build:\n    steps:\n      - run: echo hi\n"
        )
        .unwrap();

        let workflow = load_path(file.path()).unwrap();
        assert_eq!(workflow.name, Some("FromDisk".to_string()));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_path("/nonexistent/workflow.yml").unwrap_err();
        assert!(matches!(err, LoadError::Io(_)));
    }
}
