use serde::{Deserialize, Serialize};

use crate::models::{Plan, StepStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    #[default]
    Idle,
    Analyzing,
    Planning,
    Proposing,
    WaitingApproval,
    Approved,
    Executing,
    Observing,
    Correcting,
    WaitingForHuman,
    Complete,
    Error,
}

impl AgentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentState::Complete | AgentState::Error)
    }

    pub fn name(&self) -> &'static str {
        match self {
            AgentState::Idle => "idle",
            AgentState::Analyzing => "analyzing",
            AgentState::Planning => "planning",
            AgentState::Proposing => "proposing",
            AgentState::WaitingApproval => "waiting_approval",
            AgentState::Approved => "approved",
            AgentState::Executing => "executing",
            AgentState::Observing => "observing",
            AgentState::Correcting => "correcting",
            AgentState::WaitingForHuman => "waiting_for_human",
            AgentState::Complete => "complete",
            AgentState::Error => "error",
        }
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    Timeout,
    MaxIterations,
    MaxRetries,
    NoRunnableStep,
    Aborted,
    PlanningFailed,
    Internal,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StopReason::Completed => "completed",
            StopReason::Timeout => "timeout",
            StopReason::MaxIterations => "max_iterations",
            StopReason::MaxRetries => "max_retries",
            StopReason::NoRunnableStep => "no_runnable_step",
            StopReason::Aborted => "aborted",
            StopReason::PlanningFailed => "planning_failed",
            StopReason::Internal => "internal",
        };
        write!(f, "{}", name)
    }
}

/// Final report of one agent loop run. Partial progress is kept in `plan`,
/// `outputs` and `artifacts` whatever the outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRunResult {
    pub run_id: String,
    pub success: bool,
    pub stop_reason: StopReason,
    pub reason: String,
    pub plan: Option<Plan>,
    pub iterations: u32,
    pub retries: u32,
    pub outputs: Vec<String>,
    pub artifacts: Vec<String>,
    pub duration_ms: u64,
}

impl AgentRunResult {
    pub fn completed_steps(&self) -> usize {
        self.plan
            .as_ref()
            .map(|p| {
                p.steps
                    .iter()
                    .filter(|s| s.status == StepStatus::Completed)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Outputs joined for hand-off to a dependent task.
    pub fn summary(&self) -> String {
        self.outputs.join("\n")
    }
}

/// Point-in-time view of a live or finished loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub run_id: String,
    pub project: String,
    pub state: AgentState,
    pub iteration: u32,
    pub retries: u32,
    pub plan: Option<Plan>,
    pub pending_question: Option<String>,
    pub awaiting_approval: bool,
}
