#![allow(clippy::needless_borrows_for_generic_args, clippy::len_zero)]

pub mod agent;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod plan;
pub mod providers;
pub mod registry;
pub mod sandbox;
pub mod tools;

pub use agent::{
    AgentDeps, AgentLoop, AgentRunResult, AgentState, AgentStatus, ApprovalDecision, HumanAnswer,
    HumanBridge, StallDetector, StopReason,
};
pub use config::{
    ensure_data_dir, get_config_dir, get_data_dir, AgentConfig, CheckpointConfig,
    ConfigLoadError, LoggingConfig, PilotConfig, PipelineConfig, SandboxConfig,
};
pub use error::{
    retry_async_with_config, CliErrorDisplay, PilotError, PilotResult, RetryConfig,
};
pub use events::{emit_isolated, AgentEvent, EventBus, EventKind, EventSink, FnSink, NullSink};
pub use logging::init_tracing;
pub use models::{
    AgentRole, Complexity, Decomposition, ExecutionResult, Plan, Step, StepStatus, Strategy, Task,
    TaskStatus, ToolResult,
};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use pipeline::{Pipeline, PipelineResult};
pub use providers::{
    CheckpointInfo, CheckpointSink, CodeContext, CodeGenerator, FileCheckpointStore,
    HeuristicDecomposer, HeuristicPlanner, KeywordReasoner, MemoryCheckpointStore, PlanContext,
    PlanGenerator, StepReasoner, TaskDecomposer, TemplateCodeGenerator, Thought,
};
pub use registry::{ActiveRun, RunRegistry};
pub use sandbox::{AbortSignal, LogLevel, LogLine, SandboxExecutor, ToolBindings};
pub use tools::{
    register_builtin_tools, FnTool, ParamType, ParameterSpec, Tool, ToolInfo, ToolRegistry, Workspace,
};
