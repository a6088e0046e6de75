use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Thought,
    Plan,
    Code,
    Executing,
    Observation,
    Error,
    Correction,
    Complete,
    StateChange,
    Proposal,
    ApprovalRequired,
    Approved,
    Rejected,
    AskHuman,
    HumanResponse,
    StuckDetected,
    StepStarted,
    StepCompleted,
    StepFailed,
    Checkpoint,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskBlocked,
    TaskRetry,
    PipelineComplete,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Thought => "thought",
            EventKind::Plan => "plan",
            EventKind::Code => "code",
            EventKind::Executing => "executing",
            EventKind::Observation => "observation",
            EventKind::Error => "error",
            EventKind::Correction => "correction",
            EventKind::Complete => "complete",
            EventKind::StateChange => "state_change",
            EventKind::Proposal => "proposal",
            EventKind::ApprovalRequired => "approval_required",
            EventKind::Approved => "approved",
            EventKind::Rejected => "rejected",
            EventKind::AskHuman => "ask_human",
            EventKind::HumanResponse => "human_response",
            EventKind::StuckDetected => "stuck_detected",
            EventKind::StepStarted => "step_started",
            EventKind::StepCompleted => "step_completed",
            EventKind::StepFailed => "step_failed",
            EventKind::Checkpoint => "checkpoint",
            EventKind::TaskStarted => "task_started",
            EventKind::TaskCompleted => "task_completed",
            EventKind::TaskFailed => "task_failed",
            EventKind::TaskBlocked => "task_blocked",
            EventKind::TaskRetry => "task_retry",
            EventKind::PipelineComplete => "pipeline_complete",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One lifecycle record. `iteration` is the agent loop iteration that
/// produced it (0 for planning and pipeline-level events).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub run_id: String,
    pub iteration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl AgentEvent {
    pub fn new(
        kind: EventKind,
        run_id: impl Into<String>,
        iteration: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            run_id: run_id.into(),
            iteration,
            step_id: None,
            task_id: None,
            message: message.into(),
            data: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn with_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_match_serde() {
        for kind in [
            EventKind::StateChange,
            EventKind::ApprovalRequired,
            EventKind::StuckDetected,
            EventKind::PipelineComplete,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.name()));
        }
    }

    #[test]
    fn test_event_builder() {
        let event = AgentEvent::new(EventKind::StepStarted, "run-1", 2, "Starting")
            .with_step("s1")
            .with_data(serde_json::json!({"attempt": 1}));

        assert_eq!(event.iteration, 2);
        assert_eq!(event.step_id.as_deref(), Some("s1"));
        assert!(event.task_id.is_none());
        assert_eq!(event.data["attempt"], 1);
    }
}
