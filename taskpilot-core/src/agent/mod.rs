//! The single-plan agent loop and its human-in-the-loop plumbing.

mod human;
mod runner;
mod stall;
mod state;

pub use human::{ApprovalDecision, HumanAnswer, HumanBridge};
pub use runner::{AgentDeps, AgentLoop};
pub use stall::StallDetector;
pub use state::{AgentRunResult, AgentState, AgentStatus, StopReason};
