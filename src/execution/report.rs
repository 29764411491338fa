// Run Report
// Structured summary of a completed workflow run

use crate::execution::context::Outcome;

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

/// One step's record in the report.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub name: String,
    pub outcome: Outcome,
    pub duration: Duration,
}

/// One job instance's record in the report.
///
/// `duration` is the sum of the instance's step durations; instances
/// that never ran report zero.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceReport {
    pub job_id: String,
    pub instance_name: String,
    pub outcome: Outcome,
    pub duration: Duration,
    pub continue_on_error: bool,
    pub steps: Vec<StepRecord>,
    pub outputs: HashMap<String, String>,
}

/// Summary of a whole run. Serializable for machine consumption.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub workflow_name: Option<String>,
    pub overall: Outcome,
    /// Wall-clock time for the run, not the sum of instance durations
    pub total_duration: Duration,
    pub instances: Vec<InstanceReport>,
}

impl RunSummary {
    pub fn new(
        workflow_name: Option<String>,
        total_duration: Duration,
        instances: Vec<InstanceReport>,
    ) -> Self {
        let overall = overall_outcome(&instances);
        Self {
            workflow_name,
            overall,
            total_duration,
            instances,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.overall == Outcome::Success
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.instances
            .iter()
            .filter(|i| i.outcome == outcome)
            .count()
    }

    pub fn instance(&self, name: &str) -> Option<&InstanceReport> {
        self.instances.iter().find(|i| i.instance_name == name)
    }
}

/// A run fails when any instance failed and its job does not carry
/// `continue-on-error`. Skipped and cancelled instances never fail a run
/// by themselves.
fn overall_outcome(instances: &[InstanceReport]) -> Outcome {
    let failed = instances
        .iter()
        .any(|i| i.outcome == Outcome::Failure && !i.continue_on_error);
    if failed {
        Outcome::Failure
    } else {
        Outcome::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(name: &str, outcome: Outcome, continue_on_error: bool) -> InstanceReport {
        InstanceReport {
            job_id: name.to_string(),
            instance_name: name.to_string(),
            outcome,
            duration: Duration::from_secs(1),
            continue_on_error,
            steps: Vec::new(),
            outputs: HashMap::new(),
        }
    }

    #[test]
    fn test_all_success() {
        let summary = RunSummary::new(
            Some("CI".to_string()),
            Duration::from_secs(5),
            vec![
                instance("build", Outcome::Success, false),
                instance("test", Outcome::Success, false),
            ],
        );

        assert!(summary.succeeded());
        assert_eq!(summary.count(Outcome::Success), 2);
    }

    #[test]
    fn test_failure_fails_run() {
        let summary = RunSummary::new(
            None,
            Duration::from_secs(5),
            vec![
                instance("build", Outcome::Success, false),
                instance("test", Outcome::Failure, false),
            ],
        );

        assert_eq!(summary.overall, Outcome::Failure);
        assert!(!summary.succeeded());
    }

    #[test]
    fn test_continue_on_error_failure_does_not_fail_run() {
        let summary = RunSummary::new(
            None,
            Duration::from_secs(5),
            vec![
                instance("build", Outcome::Success, false),
                instance("nightly", Outcome::Failure, true),
            ],
        );

        assert!(summary.succeeded());
        // Still reported as a failure per instance
        assert_eq!(summary.count(Outcome::Failure), 1);
    }

    #[test]
    fn test_skipped_and_cancelled_do_not_fail_run() {
        let summary = RunSummary::new(
            None,
            Duration::from_secs(5),
            vec![
                instance("build", Outcome::Success, false),
                instance("docs", Outcome::Skipped, false),
                instance("bench", Outcome::Cancelled, false),
            ],
        );

        assert!(summary.succeeded());
        assert_eq!(summary.count(Outcome::Skipped), 1);
        assert_eq!(summary.count(Outcome::Cancelled), 1);
    }

    #[test]
    fn test_serializes_to_json() {
        let summary = RunSummary::new(
            Some("CI".to_string()),
            Duration::from_secs(2),
            vec![instance("build", Outcome::Success, false)],
        );

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["overall"], "success");
        assert_eq!(json["instances"][0]["outcome"], "success");
    }
}
