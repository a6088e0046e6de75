//! Collaborator seams consumed by the agent loop and the pipeline.
//!
//! The engine never depends on how plans, task graphs or code are produced.
//! Offline heuristic implementations ship in [`heuristic`]; anything
//! model-backed plugs in through the same traits.

mod checkpoint;
mod heuristic;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PilotResult;
use crate::models::{Decomposition, Plan, Step};
use crate::tools::ToolInfo;

pub use checkpoint::{FileCheckpointStore, MemoryCheckpointStore, StoredCheckpoint};
pub use heuristic::{
    split_clauses, Clause, HeuristicDecomposer, HeuristicPlanner, KeywordReasoner,
    TemplateCodeGenerator,
};

/// Inputs available when (re)generating a plan.
#[derive(Debug, Clone, Default)]
pub struct PlanContext {
    pub run_id: String,
    pub project: String,
    pub tools: Vec<ToolInfo>,
    /// Reviewer feedback from rejected proposals, oldest first.
    pub feedback: Vec<String>,
    /// Results handed over from upstream work, such as dependency outputs
    /// of a pipeline task.
    pub background: Vec<String>,
}

#[async_trait]
pub trait PlanGenerator: Send + Sync {
    async fn generate_plan(&self, goal: &str, context: &PlanContext) -> PilotResult<Plan>;
}

#[async_trait]
pub trait TaskDecomposer: Send + Sync {
    async fn decompose(&self, goal: &str) -> PilotResult<Decomposition>;
}

/// Inputs available when generating code for one step.
#[derive(Debug, Clone)]
pub struct CodeContext {
    pub run_id: String,
    pub project: String,
    pub goal: String,
    pub step: Step,
    pub reasoning: String,
    pub human_answer: Option<String>,
    /// Outputs of the steps completed so far, in order.
    pub previous_outputs: Vec<String>,
}

#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate_code(
        &self,
        task_description: &str,
        context: &CodeContext,
        available_tools: &[ToolInfo],
    ) -> PilotResult<String>;
}

/// Result of the "think" phase for a step.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Thought {
    pub reasoning: String,
    /// Set when the step cannot proceed without human input.
    pub question: Option<String>,
}

#[async_trait]
pub trait StepReasoner: Send + Sync {
    async fn think(&self, step: &Step, plan: &Plan) -> PilotResult<Thought>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointInfo {
    pub id: String,
    pub plan_id: String,
    pub goal: String,
    pub created_at: DateTime<Utc>,
    pub completed_steps: usize,
    pub total_steps: usize,
}

#[async_trait]
pub trait CheckpointSink: Send + Sync {
    async fn save_checkpoint(&self, plan: &Plan) -> PilotResult<String>;

    async fn load_checkpoint(&self, id: &str) -> PilotResult<Plan>;

    /// Stored checkpoints, newest first.
    async fn list_checkpoints(&self) -> PilotResult<Vec<CheckpointInfo>>;
}
