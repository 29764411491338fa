// Execution Events
// Progress reporting and event types for workflow simulation

use crate::execution::context::Outcome;

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted while a workflow run executes
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Run started
    RunStarted {
        workflow_name: Option<String>,
        total_jobs: usize,
    },

    /// Run completed
    RunCompleted {
        workflow_name: Option<String>,
        outcome: Outcome,
        duration: Duration,
    },

    /// Job instance started
    JobStarted {
        job_id: String,
        instance_name: String,
        total_steps: usize,
    },

    /// Job instance completed
    JobCompleted {
        job_id: String,
        instance_name: String,
        outcome: Outcome,
        duration: Duration,
    },

    /// Job instance never ran (gate was false, a dependency failed, or
    /// fail-fast cancelled it)
    JobSkipped {
        job_id: String,
        instance_name: String,
        outcome: Outcome,
        reason: String,
    },

    /// Step started
    StepStarted {
        job_id: String,
        instance_name: String,
        step_name: String,
        step_index: usize,
    },

    /// Step completed
    StepCompleted {
        job_id: String,
        instance_name: String,
        step_name: String,
        step_index: usize,
        outcome: Outcome,
        duration: Duration,
    },

    /// Step was skipped (condition evaluated to false)
    StepSkipped {
        job_id: String,
        instance_name: String,
        step_name: String,
        step_index: usize,
        reason: String,
    },
}

impl ExecutionEvent {
    /// Create a run started event
    pub fn run_started(workflow_name: Option<String>, total_jobs: usize) -> Self {
        Self::RunStarted {
            workflow_name,
            total_jobs,
        }
    }

    /// Create a run completed event
    pub fn run_completed(
        workflow_name: Option<String>,
        outcome: Outcome,
        duration: Duration,
    ) -> Self {
        Self::RunCompleted {
            workflow_name,
            outcome,
            duration,
        }
    }

    /// Create a job started event
    pub fn job_started(
        job_id: impl Into<String>,
        instance_name: impl Into<String>,
        total_steps: usize,
    ) -> Self {
        Self::JobStarted {
            job_id: job_id.into(),
            instance_name: instance_name.into(),
            total_steps,
        }
    }

    /// Create a job completed event
    pub fn job_completed(
        job_id: impl Into<String>,
        instance_name: impl Into<String>,
        outcome: Outcome,
        duration: Duration,
    ) -> Self {
        Self::JobCompleted {
            job_id: job_id.into(),
            instance_name: instance_name.into(),
            outcome,
            duration,
        }
    }

    /// Create a job skipped event
    pub fn job_skipped(
        job_id: impl Into<String>,
        instance_name: impl Into<String>,
        outcome: Outcome,
        reason: impl Into<String>,
    ) -> Self {
        Self::JobSkipped {
            job_id: job_id.into(),
            instance_name: instance_name.into(),
            outcome,
            reason: reason.into(),
        }
    }

    /// Create a step started event
    pub fn step_started(
        job_id: impl Into<String>,
        instance_name: impl Into<String>,
        step_name: impl Into<String>,
        step_index: usize,
    ) -> Self {
        Self::StepStarted {
            job_id: job_id.into(),
            instance_name: instance_name.into(),
            step_name: step_name.into(),
            step_index,
        }
    }

    /// Create a step completed event
    pub fn step_completed(
        job_id: impl Into<String>,
        instance_name: impl Into<String>,
        step_name: impl Into<String>,
        step_index: usize,
        outcome: Outcome,
        duration: Duration,
    ) -> Self {
        Self::StepCompleted {
            job_id: job_id.into(),
            instance_name: instance_name.into(),
            step_name: step_name.into(),
            step_index,
            outcome,
            duration,
        }
    }

    /// Create a step skipped event
    pub fn step_skipped(
        job_id: impl Into<String>,
        instance_name: impl Into<String>,
        step_name: impl Into<String>,
        step_index: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self::StepSkipped {
            job_id: job_id.into(),
            instance_name: instance_name.into(),
            step_name: step_name.into(),
            step_index,
            reason: reason.into(),
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_progress_channel() {
        let (tx, mut rx) = progress_channel();

        tx.send_event(ExecutionEvent::run_started(Some("CI".to_string()), 2));
        tx.send_event(ExecutionEvent::job_started("build", "build", 1));

        let event1 = rx.recv().await.unwrap();
        assert!(matches!(event1, ExecutionEvent::RunStarted { .. }));

        let event2 = rx.recv().await.unwrap();
        assert!(matches!(event2, ExecutionEvent::JobStarted { .. }));
    }

    #[test]
    fn test_event_construction() {
        let event = ExecutionEvent::job_completed(
            "test",
            "test (linux)",
            Outcome::Success,
            Duration::from_secs(30),
        );

        if let ExecutionEvent::JobCompleted {
            job_id,
            instance_name,
            outcome,
            duration,
        } = event
        {
            assert_eq!(job_id, "test");
            assert_eq!(instance_name, "test (linux)");
            assert_eq!(outcome, Outcome::Success);
            assert_eq!(duration, Duration::from_secs(30));
        } else {
            panic!("wrong event type");
        }
    }

    #[test]
    fn test_optional_sender() {
        let sender: Option<ProgressSender> = None;
        // Should not panic
        sender.send_event(ExecutionEvent::job_skipped(
            "test",
            "test",
            Outcome::Skipped,
            "condition false",
        ));
    }
}
