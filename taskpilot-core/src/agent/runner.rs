use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::human::{ApprovalDecision, HumanAnswer, HumanBridge};
use super::stall::StallDetector;
use super::state::{AgentRunResult, AgentState, AgentStatus, StopReason};
use crate::config::{deadline_after, AgentConfig};
use crate::error::{retry_async_with_config, PilotError, PilotResult, RetryConfig};
use crate::events::{emit_isolated, AgentEvent, EventKind, EventSink};
use crate::models::{Plan, Step};
use crate::plan;
use crate::providers::{
    CheckpointSink, CodeContext, CodeGenerator, PlanContext, PlanGenerator, StepReasoner, Thought,
};
use crate::sandbox::{escape_string_literal, AbortSignal, SandboxExecutor, ToolBindings};

/// Collaborators a loop calls out to.
#[derive(Clone)]
pub struct AgentDeps {
    pub planner: Arc<dyn PlanGenerator>,
    pub coder: Arc<dyn CodeGenerator>,
    pub reasoner: Arc<dyn StepReasoner>,
    pub checkpoints: Option<Arc<dyn CheckpointSink>>,
    pub sandbox: Arc<SandboxExecutor>,
    pub events: Arc<dyn EventSink>,
}

#[derive(Default)]
struct LoopInner {
    state: AgentState,
    started: bool,
    iteration: u32,
    retries: u32,
    plan: Option<Plan>,
}

struct Stop {
    reason: StopReason,
    message: String,
}

impl Stop {
    fn new(reason: StopReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

#[derive(Default)]
struct RunLedger {
    outputs: Vec<String>,
    artifacts: Vec<String>,
}

/// Drives one plan through think, generate, execute and observe, one step
/// at a time.
///
/// A loop instance serves a single run. Share it behind an [`Arc`] so a
/// front-end can call [`approve`](Self::approve), [`answer`](Self::answer) or
/// [`abort`](Self::abort) while [`run`](Self::run) is pending.
pub struct AgentLoop {
    run_id: String,
    project: String,
    task_id: Option<String>,
    background: Vec<String>,
    config: AgentConfig,
    deps: AgentDeps,
    human: HumanBridge,
    signal: AbortSignal,
    inner: Mutex<LoopInner>,
}

impl AgentLoop {
    pub fn new(deps: AgentDeps, config: AgentConfig) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            project: "default".to_string(),
            task_id: None,
            background: Vec::new(),
            config,
            deps,
            human: HumanBridge::new(),
            signal: AbortSignal::new(),
            inner: Mutex::new(LoopInner::default()),
        }
    }

    /// Scope value injected into tool calls as `project`.
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = project.into();
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// Tag every event of this loop with a pipeline task id.
    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Upstream results passed to the planner with the goal.
    pub fn with_background(mut self, background: Vec<String>) -> Self {
        self.background = background;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn human(&self) -> &HumanBridge {
        &self.human
    }

    pub fn approve(&self) -> PilotResult<()> {
        self.human.approve()
    }

    pub fn reject(&self, feedback: impl Into<String>) -> PilotResult<()> {
        self.human.reject(feedback)
    }

    pub fn answer(&self, text: impl Into<String>) -> PilotResult<()> {
        self.human.answer(text)
    }

    pub fn is_finished(&self) -> bool {
        self.lock().state.is_terminal()
    }

    pub fn is_aborted(&self) -> bool {
        self.signal.is_aborted()
    }

    pub fn status(&self) -> AgentStatus {
        let inner = self.lock();
        AgentStatus {
            run_id: self.run_id.clone(),
            project: self.project.clone(),
            state: inner.state,
            iteration: inner.iteration,
            retries: inner.retries,
            plan: inner.plan.clone(),
            pending_question: self.human.pending_question(),
            awaiting_approval: self.human.has_pending_approval(),
        }
    }

    /// Stop the run. Pending approval or question waits resolve at once with
    /// the cancellation sentinel; no state transition happens afterwards.
    pub fn abort(&self, reason: &str) {
        let from = {
            let mut inner = self.lock();
            if inner.state.is_terminal() || self.signal.is_aborted() {
                return;
            }
            let from = inner.state;
            inner.state = AgentState::Error;
            from
        };

        self.signal.abort();
        self.human.cancel();
        info!(run_id = %self.run_id, reason, "Agent run aborted");
        self.publish(
            self.event(EventKind::StateChange, format!("{} -> {}", from, AgentState::Error))
                .with_data(json!({ "from": from, "to": AgentState::Error, "reason": reason })),
        );
        self.publish(self.event(EventKind::Error, format!("Run aborted: {}", reason)));
    }

    /// Plan `goal`, optionally wait for approval, then execute.
    pub async fn run(&self, goal: &str) -> AgentRunResult {
        let start = Instant::now();
        if let Err(e) = self.begin() {
            return self.refused(e, start);
        }

        let mut ledger = RunLedger::default();
        info!(run_id = %self.run_id, project = %self.project, goal, "Starting agent run");
        let stop = match self.plan_and_approve(goal).await {
            Ok(Some(plan)) => self.drive(plan, start, &mut ledger).await,
            Ok(None) => Ok(Stop::new(StopReason::Aborted, "run aborted")),
            Err(e) => Ok(Stop::new(StopReason::PlanningFailed, e.to_string())),
        };
        let stop = stop.unwrap_or_else(|e| Stop::new(StopReason::Internal, e.to_string()));
        self.conclude(stop, ledger, start)
    }

    /// Continue an existing plan, for example one loaded from a checkpoint.
    /// Planning and approval are skipped.
    pub async fn resume(&self, plan: Plan) -> AgentRunResult {
        let start = Instant::now();
        if let Err(e) = self.begin() {
            return self.refused(e, start);
        }

        let mut ledger = RunLedger {
            outputs: plan.steps.iter().filter_map(|s| s.output.clone()).collect(),
            artifacts: Vec::new(),
        };
        self.store_plan(&plan);

        if let Some(running) = plan::running_step(&plan) {
            let message = format!(
                "cannot resume: step '{}' was running when the plan was saved",
                running.id
            );
            return self.conclude(Stop::new(StopReason::Internal, message), ledger, start);
        }

        info!(run_id = %self.run_id, plan_id = %plan.id, "Resuming agent run");
        self.set_state(AgentState::Approved);
        let stop = self
            .drive(plan, start, &mut ledger)
            .await
            .unwrap_or_else(|e| Stop::new(StopReason::Internal, e.to_string()));
        self.conclude(stop, ledger, start)
    }

    fn begin(&self) -> PilotResult<()> {
        let mut inner = self.lock();
        if inner.started {
            return Err(PilotError::AlreadyExists(format!(
                "agent run {} already started",
                self.run_id
            )));
        }
        inner.started = true;
        Ok(())
    }

    /// Result for a second `run`/`resume` call; the live run is untouched.
    fn refused(&self, error: PilotError, start: Instant) -> AgentRunResult {
        warn!(run_id = %self.run_id, "{}", error);
        AgentRunResult {
            run_id: self.run_id.clone(),
            success: false,
            stop_reason: StopReason::Internal,
            reason: error.to_string(),
            plan: None,
            iterations: 0,
            retries: 0,
            outputs: Vec::new(),
            artifacts: Vec::new(),
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// `Ok(None)` when the run was aborted during approval.
    async fn plan_and_approve(&self, goal: &str) -> PilotResult<Option<Plan>> {
        if self.signal.is_aborted() {
            return Ok(None);
        }
        self.set_state(AgentState::Analyzing);
        let mut context = PlanContext {
            run_id: self.run_id.clone(),
            project: self.project.clone(),
            tools: self.deps.sandbox.registry().list_tools().await,
            feedback: Vec::new(),
            background: self.background.clone(),
        };

        let mut plan = self.generate_plan(goal, &context).await?;
        if !self.config.require_approval {
            return Ok(Some(plan));
        }

        loop {
            self.set_state(AgentState::Proposing);
            self.publish(
                self.event(EventKind::Proposal, format!("Proposed plan with {} steps", plan.len()))
                    .with_data(json!({ "plan": &plan })),
            );

            self.set_state(AgentState::WaitingApproval);
            self.publish(self.event(EventKind::ApprovalRequired, "Waiting for plan approval"));

            match self.human.wait_for_approval().await {
                ApprovalDecision::Approved => {
                    self.publish(self.event(EventKind::Approved, "Plan approved"));
                    self.set_state(AgentState::Approved);
                    return Ok(Some(plan));
                }
                ApprovalDecision::Rejected(feedback) => {
                    info!(run_id = %self.run_id, feedback = %feedback, "Plan rejected, replanning");
                    self.publish(
                        self.event(EventKind::Rejected, format!("Plan rejected: {}", feedback))
                            .with_data(json!({ "feedback": &feedback })),
                    );
                    context.feedback.push(feedback);
                    plan = self.generate_plan(goal, &context).await?;
                }
                ApprovalDecision::Cancelled => return Ok(None),
            }
        }
    }

    async fn generate_plan(&self, goal: &str, context: &PlanContext) -> PilotResult<Plan> {
        self.set_state(AgentState::Planning);
        let plan = self.deps.planner.generate_plan(goal, context).await?;
        if plan.is_empty() {
            return Err(PilotError::EmptyPlan(goal.to_string()));
        }

        debug!(run_id = %self.run_id, steps = plan.len(), "Plan generated");
        self.store_plan(&plan);
        self.publish(
            self.event(EventKind::Plan, format!("Plan with {} steps", plan.len()))
                .with_data(json!({ "plan": &plan })),
        );
        Ok(plan)
    }

    /// The execute/observe/correct cycle. Errors are bookkeeping faults and
    /// end the run as `internal`.
    async fn drive(&self, mut plan: Plan, start: Instant, ledger: &mut RunLedger) -> PilotResult<Stop> {
        let deadline = deadline_after(start, self.config.run_timeout());
        let mut stall = StallDetector::new(self.config.stuck_threshold);
        let bindings = ToolBindings::all().with_scope("project", self.project.clone());
        self.set_state(AgentState::Executing);

        loop {
            if self.signal.is_aborted() {
                return Ok(Stop::new(StopReason::Aborted, "run aborted"));
            }
            if plan::is_complete(&plan) {
                return Ok(Stop::new(
                    StopReason::Completed,
                    format!("all {} steps done", plan.len()),
                ));
            }

            let iteration = self.lock().iteration;
            if iteration >= self.config.max_iterations {
                return Ok(Stop::new(
                    StopReason::MaxIterations,
                    PilotError::MaxIterationsReached(self.config.max_iterations).to_string(),
                ));
            }
            if Instant::now() >= deadline {
                return Ok(Stop::new(
                    StopReason::Timeout,
                    PilotError::RunTimeout(self.config.timeout_minutes).to_string(),
                ));
            }

            let Some(step) = plan::next_step(&plan).cloned() else {
                return Ok(Stop::new(
                    StopReason::NoRunnableStep,
                    "plan is incomplete but no step is pending",
                ));
            };
            let iteration = iteration + 1;
            self.lock().iteration = iteration;

            let thought = self.think(&step, &plan).await;
            let human_answer = match thought.question {
                Some(question) => match self.ask_human(&step, &question, deadline).await {
                    Some(answer) => answer,
                    None => return Ok(Stop::new(StopReason::Aborted, "run aborted")),
                },
                None => None,
            };

            if stall.check(&step.description) {
                let diagnosis = format!(
                    "stalled: '{}' attempted {} times in a row",
                    step.description,
                    stall.threshold()
                );
                warn!(run_id = %self.run_id, step_id = %step.id, iteration, "{}", diagnosis);
                self.publish(
                    self.event(EventKind::StuckDetected, diagnosis.clone())
                        .with_step(&step.id)
                        .with_data(json!({ "repeats": stall.threshold() })),
                );
                plan = self.correct(&plan, &step, &diagnosis)?;
                continue;
            }

            plan = plan::mark_running(&plan, &step.id)?;
            self.store_plan(&plan);
            self.publish(
                self.event(EventKind::StepStarted, step.description.clone())
                    .with_step(&step.id),
            );

            let outcome = self
                .execute_step(&plan, &step, &thought.reasoning, human_answer, ledger, &bindings, deadline)
                .await;

            if self.signal.is_aborted() {
                return Ok(Stop::new(StopReason::Aborted, "run aborted"));
            }

            match outcome {
                Ok(output) => {
                    plan = plan::mark_complete(&plan, &step.id, output.clone())?;
                    self.store_plan(&plan);
                    ledger.outputs.push(output);
                    info!(run_id = %self.run_id, step_id = %step.id, iteration, "Step completed");
                    self.publish(
                        self.event(EventKind::StepCompleted, step.description.clone())
                            .with_step(&step.id),
                    );
                    if step.checkpoint {
                        self.checkpoint(&plan, &step).await;
                    }
                    self.set_state(AgentState::Executing);
                }
                Err(error) if error.is_timeout() && Instant::now() >= deadline => {
                    plan = plan::mark_failed(&plan, &step.id, error.to_string())?;
                    self.store_plan(&plan);
                    return Ok(Stop::new(
                        StopReason::Timeout,
                        PilotError::RunTimeout(self.config.timeout_minutes).to_string(),
                    ));
                }
                Err(error) => {
                    let message = error.to_string();
                    plan = plan::mark_failed(&plan, &step.id, message.clone())?;
                    self.store_plan(&plan);
                    warn!(run_id = %self.run_id, step_id = %step.id, iteration, "Step failed: {}", message);
                    self.publish(
                        self.event(EventKind::StepFailed, message.clone())
                            .with_step(&step.id),
                    );

                    let retries = self.lock().retries;
                    if retries >= self.config.max_retries {
                        return Ok(Stop::new(
                            StopReason::MaxRetries,
                            format!(
                                "{}; last failure on step '{}': {}",
                                PilotError::MaxRetriesReached(self.config.max_retries),
                                step.id,
                                message
                            ),
                        ));
                    }
                    self.lock().retries = retries + 1;
                    plan = self.correct(&plan, &step, &message)?;
                }
            }
        }
    }

    async fn think(&self, step: &Step, plan: &Plan) -> Thought {
        let thought = match self.deps.reasoner.think(step, plan).await {
            Ok(thought) => thought,
            Err(e) => {
                warn!(run_id = %self.run_id, step_id = %step.id, "Reasoner failed: {}", e);
                Thought::default()
            }
        };
        self.publish(
            self.event(EventKind::Thought, thought.reasoning.clone())
                .with_step(&step.id),
        );
        thought
    }

    /// `None` when the wait was cancelled; `Some(None)` when it timed out.
    async fn ask_human(
        &self,
        step: &Step,
        question: &str,
        deadline: Instant,
    ) -> Option<Option<String>> {
        self.set_state(AgentState::WaitingForHuman);
        self.publish(
            self.event(EventKind::AskHuman, question.to_string())
                .with_step(&step.id),
        );

        let wait = self
            .config
            .ask_human_timeout()
            .min(deadline.saturating_duration_since(Instant::now()));
        let answer = match self.human.ask(question, wait).await {
            HumanAnswer::Answered(text) => {
                self.publish(
                    self.event(EventKind::HumanResponse, text.clone())
                        .with_step(&step.id),
                );
                Some(text)
            }
            HumanAnswer::TimedOut => {
                debug!(run_id = %self.run_id, step_id = %step.id, "Question timed out, continuing without answer");
                self.publish(
                    self.event(EventKind::HumanResponse, "no answer before timeout")
                        .with_step(&step.id)
                        .with_data(json!({ "timed_out": true })),
                );
                None
            }
            HumanAnswer::Cancelled => return None,
        };

        self.set_state(AgentState::Executing);
        Some(answer)
    }

    /// Generate and run the code for a step that is already marked running.
    async fn execute_step(
        &self,
        plan: &Plan,
        step: &Step,
        reasoning: &str,
        human_answer: Option<String>,
        ledger: &mut RunLedger,
        bindings: &ToolBindings,
        deadline: Instant,
    ) -> PilotResult<String> {
        let context = CodeContext {
            run_id: self.run_id.clone(),
            project: self.project.clone(),
            goal: plan.goal.clone(),
            step: step.clone(),
            reasoning: reasoning.to_string(),
            human_answer,
            previous_outputs: ledger.outputs.clone(),
        };
        let tools = self.deps.sandbox.registry().list_tools().await;

        let remaining = deadline.saturating_duration_since(Instant::now());
        let generated = tokio::time::timeout(
            remaining,
            self.deps.coder.generate_code(&step.description, &context, &tools),
        )
        .await
        .map_err(|_| PilotError::ExecutionTimeout(remaining.as_millis() as u64))?
        .map_err(|e| match e {
            PilotError::GenerationFailed(_) => e,
            other => PilotError::GenerationFailed(other.to_string()),
        })?;
        let code = self.fill_placeholders(&generated, &plan.goal, &step.id);

        self.publish(
            self.event(EventKind::Code, format!("{} lines", code.lines().count()))
                .with_step(&step.id)
                .with_data(json!({ "code": &code })),
        );
        self.publish(self.event(EventKind::Executing, step.description.clone()).with_step(&step.id));

        let timeout = self
            .config
            .execution_timeout()
            .min(deadline.saturating_duration_since(Instant::now()))
            .max(Duration::from_millis(1));
        let result = self
            .deps
            .sandbox
            .execute_with_signal(&code, bindings, Some(timeout), self.signal.clone())
            .await;

        self.set_state(AgentState::Observing);
        self.publish(
            self.event(EventKind::Observation, result.output.clone())
                .with_step(&step.id)
                .with_data(json!({
                    "success": result.is_success(),
                    "error": &result.error,
                    "tools_invoked": &result.tools_invoked,
                    "artifacts": &result.artifacts,
                    "duration_ms": result.duration_ms,
                })),
        );
        ledger.artifacts.extend(result.artifacts.iter().cloned());

        if result.timed_out() {
            return Err(PilotError::ExecutionTimeout(timeout.as_millis() as u64));
        }
        match result.error {
            None => Ok(result.output),
            Some(error) => Err(PilotError::ExecutionFailed(error)),
        }
    }

    fn correct(&self, plan: &Plan, step: &Step, obstacle: &str) -> PilotResult<Plan> {
        self.set_state(AgentState::Correcting);
        let revised = plan::revise(plan, obstacle, &step.id)?;
        self.store_plan(&revised);

        let retry_id = revised
            .position(&step.id)
            .and_then(|i| revised.steps.get(i + 1))
            .map(|s| s.id.clone())
            .unwrap_or_default();
        self.publish(
            self.event(EventKind::Correction, format!("Added {} after failure", retry_id))
                .with_step(&step.id)
                .with_data(json!({ "retry_step": retry_id, "obstacle": obstacle })),
        );
        self.set_state(AgentState::Executing);
        Ok(revised)
    }

    async fn checkpoint(&self, plan: &Plan, step: &Step) {
        let Some(sink) = &self.deps.checkpoints else {
            return;
        };

        let saved = retry_async_with_config(
            || sink.save_checkpoint(plan),
            RetryConfig::for_checkpoint(),
        )
        .await;

        match saved {
            Ok(checkpoint_id) => {
                info!(run_id = %self.run_id, step_id = %step.id, checkpoint = %checkpoint_id, "Checkpoint saved");
                self.publish(
                    self.event(EventKind::Checkpoint, format!("Checkpoint {}", checkpoint_id))
                        .with_step(&step.id)
                        .with_data(json!({ "checkpoint_id": checkpoint_id })),
                );
            }
            Err(e) => {
                warn!(run_id = %self.run_id, step_id = %step.id, "Checkpoint failed: {}", e);
                self.publish(
                    self.event(EventKind::Error, e.to_string())
                        .with_step(&step.id),
                );
            }
        }
    }

    fn fill_placeholders(&self, code: &str, goal: &str, step_id: &str) -> String {
        [
            ("{{PROJECT}}", self.project.as_str()),
            ("{{RUN_ID}}", self.run_id.as_str()),
            ("{{STEP_ID}}", step_id),
            ("{{GOAL}}", goal),
        ]
        .iter()
        .fold(code.to_string(), |code, (token, value)| {
            code.replace(token, &escape_string_literal(value))
        })
    }

    fn conclude(&self, stop: Stop, ledger: RunLedger, start: Instant) -> AgentRunResult {
        let success = stop.reason == StopReason::Completed;
        let duration_ms = start.elapsed().as_millis() as u64;

        if stop.reason != StopReason::Aborted {
            self.set_state(if success {
                AgentState::Complete
            } else {
                AgentState::Error
            });
            let kind = if success {
                EventKind::Complete
            } else {
                EventKind::Error
            };
            self.publish(
                self.event(kind, stop.message.clone())
                    .with_data(json!({ "stop_reason": stop.reason, "duration_ms": duration_ms })),
            );
        }

        let inner = self.lock();
        if success {
            info!(run_id = %self.run_id, iterations = inner.iteration, duration_ms, "Agent run completed");
        } else {
            warn!(
                run_id = %self.run_id,
                stop_reason = %stop.reason,
                iterations = inner.iteration,
                duration_ms,
                "Agent run failed: {}",
                stop.message
            );
        }

        AgentRunResult {
            run_id: self.run_id.clone(),
            success,
            stop_reason: stop.reason,
            reason: stop.message,
            plan: inner.plan.clone(),
            iterations: inner.iteration,
            retries: inner.retries,
            outputs: ledger.outputs,
            artifacts: ledger.artifacts,
            duration_ms,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LoopInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn store_plan(&self, plan: &Plan) {
        self.lock().plan = Some(plan.clone());
    }

    /// No-op once the run is aborted or finished.
    fn set_state(&self, next: AgentState) {
        let from = {
            let mut inner = self.lock();
            if self.signal.is_aborted() || inner.state.is_terminal() || inner.state == next {
                return;
            }
            let from = inner.state;
            inner.state = next;
            from
        };

        debug!(run_id = %self.run_id, from = %from, to = %next, "Agent state change");
        self.publish(
            self.event(EventKind::StateChange, format!("{} -> {}", from, next))
                .with_data(json!({ "from": from, "to": next })),
        );
    }

    fn event(&self, kind: EventKind, message: impl Into<String>) -> AgentEvent {
        let iteration = self.lock().iteration;
        let event = AgentEvent::new(kind, self.run_id.clone(), iteration, message);
        match &self.task_id {
            Some(task_id) => event.with_task(task_id.clone()),
            None => event,
        }
    }

    fn publish(&self, event: AgentEvent) {
        emit_isolated(self.deps.events.as_ref(), &event);
    }
}
