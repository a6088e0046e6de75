use std::sync::Arc;

use tracing::{info, warn};

use crate::agent::{AgentDeps, AgentLoop, AgentRunResult};
use crate::config::PilotConfig;
use crate::error::{PilotError, PilotResult};
use crate::events::EventBus;
use crate::models::{Plan, Task};
use crate::pipeline::{Pipeline, PipelineResult};
use crate::providers::{
    CheckpointSink, CodeGenerator, FileCheckpointStore, HeuristicDecomposer, HeuristicPlanner,
    KeywordReasoner, MemoryCheckpointStore, PlanGenerator, StepReasoner, TaskDecomposer,
    TemplateCodeGenerator,
};
use crate::registry::RunRegistry;
use crate::sandbox::SandboxExecutor;
use crate::tools::{register_builtin_tools, ToolRegistry, Workspace};

/// Entry point that owns every shared collaborator and the keyed registries
/// of live agent loops and pipelines.
pub struct Orchestrator {
    config: PilotConfig,
    tools: Arc<ToolRegistry>,
    sandbox: Arc<SandboxExecutor>,
    events: Arc<EventBus>,
    planner: Arc<dyn PlanGenerator>,
    coder: Arc<dyn CodeGenerator>,
    reasoner: Arc<dyn StepReasoner>,
    decomposer: Arc<dyn TaskDecomposer>,
    checkpoints: Option<Arc<dyn CheckpointSink>>,
    agents: RunRegistry<AgentLoop>,
    pipelines: RunRegistry<Pipeline>,
}

impl Orchestrator {
    pub fn builder(config: PilotConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    pub fn config(&self) -> &PilotConfig {
        &self.config
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn sandbox(&self) -> &Arc<SandboxExecutor> {
        &self.sandbox
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn checkpoints(&self) -> Option<&Arc<dyn CheckpointSink>> {
        self.checkpoints.as_ref()
    }

    pub fn agents(&self) -> &RunRegistry<AgentLoop> {
        &self.agents
    }

    pub fn pipelines(&self) -> &RunRegistry<Pipeline> {
        &self.pipelines
    }

    pub fn agent_deps(&self) -> AgentDeps {
        AgentDeps {
            planner: self.planner.clone(),
            coder: self.coder.clone(),
            reasoner: self.reasoner.clone(),
            checkpoints: self.checkpoints.clone(),
            sandbox: self.sandbox.clone(),
            events: self.events.clone(),
        }
    }

    /// A loop for `key`, registered before it starts. Any live loop under the
    /// same key is aborted. Callers that need to approve or answer keep the
    /// returned handle and call [`run_agent_loop`](Self::run_agent_loop).
    pub async fn start_agent(&self, key: &str) -> Arc<AgentLoop> {
        let agent = Arc::new(
            AgentLoop::new(self.agent_deps(), self.config.agent.clone()).with_project(key),
        );
        self.agents.register(key, agent.clone()).await;
        agent
    }

    pub async fn run_agent_loop(&self, key: &str, agent: Arc<AgentLoop>, goal: &str) -> AgentRunResult {
        let result = agent.run(goal).await;
        self.agents.evict(key, &agent).await;
        result
    }

    pub async fn run_agent(&self, key: &str, goal: &str) -> AgentRunResult {
        let agent = self.start_agent(key).await;
        info!(key, run_id = agent.run_id(), "Running agent");
        self.run_agent_loop(key, agent, goal).await
    }

    /// Continue a stored plan under `key`.
    pub async fn resume_agent(&self, key: &str, checkpoint_id: &str) -> PilotResult<AgentRunResult> {
        let plan: Plan = match &self.checkpoints {
            Some(store) => store.load_checkpoint(checkpoint_id).await?,
            None => {
                return Err(PilotError::NotSupported(
                    "checkpoints are disabled".to_string(),
                ))
            }
        };

        let agent = self.start_agent(key).await;
        let result = agent.resume(plan).await;
        self.agents.evict(key, &agent).await;
        Ok(result)
    }

    pub async fn start_pipeline(&self, key: &str) -> Arc<Pipeline> {
        let pipeline = Arc::new(
            Pipeline::new(
                self.agent_deps(),
                self.decomposer.clone(),
                self.config.pipeline.clone(),
                self.config.agent.clone(),
            )
            .with_project(key),
        );
        self.pipelines.register(key, pipeline.clone()).await;
        pipeline
    }

    pub async fn run_pipeline(&self, key: &str, goal: &str) -> PilotResult<PipelineResult> {
        let pipeline = self.start_pipeline(key).await;
        let result = pipeline.run(goal).await;
        self.pipelines.evict(key, &pipeline).await;
        result
    }

    pub async fn run_pipeline_graph(&self, key: &str, tasks: Vec<Task>) -> PilotResult<PipelineResult> {
        let pipeline = self.start_pipeline(key).await;
        let result = pipeline.run_graph(tasks).await;
        self.pipelines.evict(key, &pipeline).await;
        result
    }

    /// Abort whatever runs under `key`. Returns true if anything was live.
    pub async fn abort(&self, key: &str) -> bool {
        let agent = self.agents.abort(key, "aborted by request").await;
        let pipeline = self.pipelines.abort(key, "aborted by request").await;
        agent || pipeline
    }

    pub async fn active_keys(&self) -> Vec<String> {
        let mut keys = self.agents.active_keys().await;
        keys.extend(self.pipelines.active_keys().await);
        keys.sort();
        keys.dedup();
        keys
    }
}

pub struct OrchestratorBuilder {
    config: PilotConfig,
    tools: Option<Arc<ToolRegistry>>,
    workspace: Option<Arc<Workspace>>,
    events: Option<Arc<EventBus>>,
    planner: Option<Arc<dyn PlanGenerator>>,
    coder: Option<Arc<dyn CodeGenerator>>,
    reasoner: Option<Arc<dyn StepReasoner>>,
    decomposer: Option<Arc<dyn TaskDecomposer>>,
    checkpoints: Option<Option<Arc<dyn CheckpointSink>>>,
}

impl OrchestratorBuilder {
    pub fn new(config: PilotConfig) -> Self {
        Self {
            config,
            tools: None,
            workspace: None,
            events: None,
            planner: None,
            coder: None,
            reasoner: None,
            decomposer: None,
            checkpoints: None,
        }
    }

    /// Use an existing registry as is; built-in tools are not added.
    pub fn tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Workspace backing the built-in file tools.
    pub fn workspace(mut self, workspace: Arc<Workspace>) -> Self {
        self.workspace = Some(workspace);
        self
    }

    pub fn events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn planner(mut self, planner: Arc<dyn PlanGenerator>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn coder(mut self, coder: Arc<dyn CodeGenerator>) -> Self {
        self.coder = Some(coder);
        self
    }

    pub fn reasoner(mut self, reasoner: Arc<dyn StepReasoner>) -> Self {
        self.reasoner = Some(reasoner);
        self
    }

    pub fn decomposer(mut self, decomposer: Arc<dyn TaskDecomposer>) -> Self {
        self.decomposer = Some(decomposer);
        self
    }

    /// Override the configured checkpoint store; `None` disables checkpoints.
    pub fn checkpoints(mut self, checkpoints: Option<Arc<dyn CheckpointSink>>) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    pub async fn build(self) -> PilotResult<Orchestrator> {
        let tools = match self.tools {
            Some(tools) => tools,
            None => {
                let tools = Arc::new(ToolRegistry::new());
                let workspace = self.workspace.unwrap_or_else(|| Arc::new(Workspace::new()));
                register_builtin_tools(&tools, workspace).await?;
                tools
            }
        };

        let checkpoints = match self.checkpoints {
            Some(checkpoints) => checkpoints,
            None => default_checkpoints(&self.config),
        };

        let sandbox = Arc::new(SandboxExecutor::new(
            tools.clone(),
            self.config.sandbox.clone(),
        ));

        let tool_count = tools.len().await;
        info!(
            tools = tool_count,
            checkpoints = checkpoints.is_some(),
            "Orchestrator ready"
        );

        Ok(Orchestrator {
            config: self.config,
            tools,
            sandbox,
            events: self.events.unwrap_or_else(|| Arc::new(EventBus::new())),
            planner: self.planner.unwrap_or_else(|| Arc::new(HeuristicPlanner)),
            coder: self.coder.unwrap_or_else(|| Arc::new(TemplateCodeGenerator)),
            reasoner: self.reasoner.unwrap_or_else(|| Arc::new(KeywordReasoner)),
            decomposer: self
                .decomposer
                .unwrap_or_else(|| Arc::new(HeuristicDecomposer)),
            checkpoints,
            agents: RunRegistry::new(),
            pipelines: RunRegistry::new(),
        })
    }
}

fn default_checkpoints(config: &PilotConfig) -> Option<Arc<dyn CheckpointSink>> {
    if !config.checkpoints.enabled {
        return None;
    }
    match config.checkpoints.resolved_directory() {
        Some(directory) => Some(Arc::new(FileCheckpointStore::new(directory))),
        None => {
            warn!("No data directory available, keeping checkpoints in memory");
            Some(Arc::new(MemoryCheckpointStore::new()))
        }
    }
}
