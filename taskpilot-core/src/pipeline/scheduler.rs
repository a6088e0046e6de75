use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::frontier::{cyclic_tasks, explain_blocked, find_duplicate, ready_frontier};
use crate::agent::{AgentDeps, AgentLoop, StopReason};
use crate::config::{AgentConfig, PipelineConfig};
use crate::error::{PilotError, PilotResult, RetryConfig};
use crate::events::{emit_isolated, AgentEvent, EventKind};
use crate::models::{Complexity, Decomposition, Strategy, Task, TaskStatus};
use crate::providers::TaskDecomposer;
use crate::sandbox::AbortSignal;

const ABORT_REASON: &str = "pipeline aborted";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub run_id: String,
    pub success: bool,
    pub tasks: Vec<Task>,
    pub completed: usize,
    pub failed: usize,
    pub blocked: usize,
    pub strategy: Strategy,
    pub complexity: Complexity,
    pub reason: String,
    pub duration_ms: u64,
}

impl PipelineResult {
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }
}

type LiveLoops = Arc<Mutex<HashMap<String, Arc<AgentLoop>>>>;

fn lock_live(live: &LiveLoops) -> MutexGuard<'_, HashMap<String, Arc<AgentLoop>>> {
    live.lock().unwrap_or_else(|e| e.into_inner())
}

/// Outcome of all attempts at one task.
struct TaskOutcome {
    success: bool,
    output: String,
    artifacts: Vec<String>,
    error: Option<String>,
    attempts: u32,
}

/// Owned handle a batch member runs with.
#[derive(Clone)]
struct TaskWorker {
    pipeline_id: String,
    project: String,
    deps: AgentDeps,
    agent_config: AgentConfig,
    retry: RetryConfig,
    signal: AbortSignal,
    live: LiveLoops,
}

impl TaskWorker {
    async fn run(self, task: Task, background: Vec<String>) -> TaskOutcome {
        let mut last_error = None;
        let mut attempts = 0;

        for attempt in 0..self.retry.max_attempts {
            if self.signal.is_aborted() {
                break;
            }
            if attempt > 0 {
                let delay = self.retry.delay_for_attempt(attempt - 1);
                info!(
                    pipeline_id = %self.pipeline_id,
                    task_id = %task.id,
                    attempt = attempt + 1,
                    "Retrying task in {:?}",
                    delay
                );
                self.publish(
                    AgentEvent::new(
                        EventKind::TaskRetry,
                        self.pipeline_id.clone(),
                        0,
                        format!("attempt {} of {}", attempt + 1, self.retry.max_attempts),
                    )
                    .with_task(&task.id)
                    .with_data(json!({ "attempt": attempt + 1, "delay_ms": delay.as_millis() as u64 })),
                );
                tokio::time::sleep(delay).await;
            }

            attempts = attempt + 1;
            let agent = Arc::new(
                AgentLoop::new(self.deps.clone(), self.agent_config.clone())
                    .with_project(self.project.clone())
                    .with_task(task.id.clone())
                    .with_run_id(format!("{}-{}-{}", self.pipeline_id, task.id, attempts))
                    .with_background(background.clone()),
            );
            lock_live(&self.live).insert(task.id.clone(), agent.clone());
            if self.signal.is_aborted() {
                agent.abort(ABORT_REASON);
            }

            let result = agent.run(&task.description).await;
            lock_live(&self.live).remove(&task.id);

            if result.success {
                return TaskOutcome {
                    success: true,
                    output: result.summary(),
                    artifacts: result.artifacts,
                    error: None,
                    attempts,
                };
            }
            if result.stop_reason == StopReason::Aborted {
                break;
            }
            debug!(task_id = %task.id, attempt = attempts, "Task attempt failed: {}", result.reason);
            last_error = Some(result.reason);
        }

        let error = if self.signal.is_aborted() {
            ABORT_REASON.to_string()
        } else {
            last_error.unwrap_or_else(|| "task never ran".to_string())
        };
        TaskOutcome {
            success: false,
            output: String::new(),
            artifacts: Vec::new(),
            error: Some(error),
            attempts,
        }
    }

    fn publish(&self, event: AgentEvent) {
        emit_isolated(self.deps.events.as_ref(), &event);
    }
}

/// Runs a task graph in ready-frontier batches, each task through its own
/// agent loop.
///
/// Only the scheduler writes task status; concurrent loops share nothing
/// but the tool registry and the event sink.
pub struct Pipeline {
    run_id: String,
    project: String,
    config: PipelineConfig,
    agent_config: AgentConfig,
    deps: AgentDeps,
    decomposer: Arc<dyn TaskDecomposer>,
    signal: AbortSignal,
    live: LiveLoops,
    finished: AtomicBool,
}

impl Pipeline {
    pub fn new(
        deps: AgentDeps,
        decomposer: Arc<dyn TaskDecomposer>,
        config: PipelineConfig,
        agent_config: AgentConfig,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            project: "default".to_string(),
            config,
            agent_config: AgentConfig {
                require_approval: false,
                ..agent_config
            },
            deps,
            decomposer,
            signal: AbortSignal::new(),
            live: Arc::new(Mutex::new(HashMap::new())),
            finished: AtomicBool::new(false),
        }
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = project.into();
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn is_aborted(&self) -> bool {
        self.signal.is_aborted()
    }

    /// Ids of tasks whose agent loop is running right now.
    pub fn active_tasks(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock_live(&self.live).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Abort every live nested loop; tasks that have not started end failed.
    pub fn abort(&self) {
        if self.signal.is_aborted() {
            return;
        }
        self.signal.abort();
        let loops: Vec<Arc<AgentLoop>> = lock_live(&self.live).values().cloned().collect();
        info!(pipeline_id = %self.run_id, live = loops.len(), "Aborting pipeline");
        for agent in loops {
            agent.abort(ABORT_REASON);
        }
    }

    /// Decompose `goal` and run the resulting graph.
    pub async fn run(&self, goal: &str) -> PilotResult<PipelineResult> {
        info!(pipeline_id = %self.run_id, goal, "Decomposing goal");
        let decomposition = self.decomposer.decompose(goal).await?;
        self.run_decomposition(decomposition).await
    }

    /// Run a caller-supplied graph.
    pub async fn run_graph(&self, tasks: Vec<Task>) -> PilotResult<PipelineResult> {
        self.run_decomposition(Decomposition::from_tasks(tasks)).await
    }

    pub async fn run_decomposition(
        &self,
        decomposition: Decomposition,
    ) -> PilotResult<PipelineResult> {
        if let Some(id) = find_duplicate(&decomposition.tasks) {
            return Err(PilotError::DuplicateTask(id.to_string()));
        }

        let start = Instant::now();
        let Decomposition {
            mut tasks,
            strategy,
            complexity,
        } = decomposition;
        for task in &tasks {
            if task.status != TaskStatus::Pending {
                return Err(PilotError::validation(format!(
                    "task '{}' must start pending, found {}",
                    task.id, task.status
                )));
            }
        }

        info!(
            pipeline_id = %self.run_id,
            tasks = tasks.len(),
            %strategy,
            %complexity,
            max_parallel = self.config.max_parallel_agents,
            "Starting pipeline"
        );

        let worker = TaskWorker {
            pipeline_id: self.run_id.clone(),
            project: self.project.clone(),
            deps: self.deps.clone(),
            agent_config: self.agent_config.clone(),
            retry: RetryConfig::for_task(self.config.retry_delay_ms, 1 + self.config.max_task_retries),
            signal: self.signal.clone(),
            live: self.live.clone(),
        };

        let outcome = self.schedule(&mut tasks, &worker).await;
        self.finished.store(true, Ordering::SeqCst);
        outcome?;

        Ok(self.summarize(tasks, strategy, complexity, start))
    }

    async fn schedule(&self, tasks: &mut [Task], worker: &TaskWorker) -> PilotResult<()> {
        let max_parallel = self.config.max_parallel_agents.max(1);

        loop {
            if self.signal.is_aborted() {
                for task in tasks.iter_mut().filter(|t| t.status == TaskStatus::Pending) {
                    transition(task, TaskStatus::Failed)?;
                    task.error = Some(ABORT_REASON.to_string());
                    task.completed_at = Some(Utc::now());
                    self.task_event(EventKind::TaskFailed, task, ABORT_REASON);
                }
                return Ok(());
            }

            let frontier = ready_frontier(tasks);
            if frontier.is_empty() {
                self.block_remaining(tasks)?;
                return Ok(());
            }

            let batch: Vec<usize> = frontier.into_iter().take(max_parallel).collect();
            debug!(pipeline_id = %self.run_id, batch = batch.len(), "Running batch");

            let mut set = JoinSet::new();
            for &index in &batch {
                let background = dependency_outputs(tasks, index);
                let task = &mut tasks[index];
                transition(task, TaskStatus::InProgress)?;
                task.started_at = Some(Utc::now());
                self.task_event(EventKind::TaskStarted, task, &task.description);

                let worker = worker.clone();
                let snapshot = task.clone();
                set.spawn(async move { (index, worker.run(snapshot, background).await) });
            }

            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((index, outcome)) => self.apply(&mut tasks[index], outcome)?,
                    Err(e) => warn!(pipeline_id = %self.run_id, "Task worker crashed: {}", e),
                }
            }

            for &index in &batch {
                let task = &mut tasks[index];
                if task.status == TaskStatus::InProgress {
                    transition(task, TaskStatus::Failed)?;
                    task.error = Some("task worker crashed".to_string());
                    task.completed_at = Some(Utc::now());
                    self.task_event(EventKind::TaskFailed, task, "task worker crashed");
                }
            }
        }
    }

    fn apply(&self, task: &mut Task, outcome: TaskOutcome) -> PilotResult<()> {
        task.attempts = outcome.attempts;
        task.artifacts = outcome.artifacts;
        task.completed_at = Some(Utc::now());

        if outcome.success {
            transition(task, TaskStatus::Completed)?;
            task.output = Some(outcome.output);
            info!(pipeline_id = %self.run_id, task_id = %task.id, attempts = task.attempts, "Task completed");
            self.task_event(EventKind::TaskCompleted, task, &task.description);
        } else {
            transition(task, TaskStatus::Failed)?;
            let error = outcome.error.unwrap_or_default();
            warn!(pipeline_id = %self.run_id, task_id = %task.id, attempts = task.attempts, "Task failed: {}", error);
            self.task_event(EventKind::TaskFailed, task, &error);
            task.error = Some(error);
        }
        Ok(())
    }

    fn block_remaining(&self, tasks: &mut [Task]) -> PilotResult<()> {
        let cyclic = cyclic_tasks(tasks);
        let pending: Vec<usize> = tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.status == TaskStatus::Pending)
            .map(|(i, _)| i)
            .collect();

        let reasons: Vec<(usize, String)> = pending
            .iter()
            .map(|&i| (i, explain_blocked(tasks, i, &cyclic)))
            .collect();

        for (index, reason) in reasons {
            let task = &mut tasks[index];
            transition(task, TaskStatus::Blocked)?;
            let error = PilotError::DependencyUnsatisfiable {
                task: task.id.clone(),
                missing: reason,
            }
            .to_string();
            warn!(pipeline_id = %self.run_id, task_id = %task.id, "{}", error);
            self.task_event(EventKind::TaskBlocked, task, &error);
            task.error = Some(error);
            task.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    fn summarize(
        &self,
        tasks: Vec<Task>,
        strategy: Strategy,
        complexity: Complexity,
        start: Instant,
    ) -> PipelineResult {
        let count = |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count();
        let completed = count(TaskStatus::Completed);
        let failed = count(TaskStatus::Failed);
        let blocked = count(TaskStatus::Blocked);
        let success = completed == tasks.len();

        let reason = if tasks.is_empty() {
            "nothing to do".to_string()
        } else if success {
            format!("all {} tasks completed", completed)
        } else if self.signal.is_aborted() {
            format!(
                "{}: {} completed, {} failed, {} blocked",
                ABORT_REASON, completed, failed, blocked
            )
        } else {
            format!(
                "partial failure: {} completed, {} failed, {} blocked",
                completed, failed, blocked
            )
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        info!(pipeline_id = %self.run_id, success, duration_ms, "{}", reason);
        emit_isolated(
            self.deps.events.as_ref(),
            &AgentEvent::new(EventKind::PipelineComplete, self.run_id.clone(), 0, reason.clone())
                .with_data(json!({
                    "success": success,
                    "completed": completed,
                    "failed": failed,
                    "blocked": blocked,
                })),
        );

        PipelineResult {
            run_id: self.run_id.clone(),
            success,
            tasks,
            completed,
            failed,
            blocked,
            strategy,
            complexity,
            reason,
            duration_ms,
        }
    }

    fn task_event(&self, kind: EventKind, task: &Task, message: &str) {
        emit_isolated(
            self.deps.events.as_ref(),
            &AgentEvent::new(kind, self.run_id.clone(), 0, message)
                .with_task(&task.id)
                .with_data(json!({
                    "status": task.status,
                    "assigned_agent": task.assigned_agent,
                    "attempts": task.attempts,
                })),
        );
    }
}

fn transition(task: &mut Task, next: TaskStatus) -> PilotResult<()> {
    if !task.status.can_transition_to(next) {
        return Err(PilotError::internal(format!(
            "task '{}' cannot move from {} to {}",
            task.id, task.status, next
        )));
    }
    task.status = next;
    Ok(())
}

fn dependency_outputs(tasks: &[Task], index: usize) -> Vec<String> {
    tasks[index]
        .dependencies
        .iter()
        .filter_map(|dep| tasks.iter().find(|t| &t.id == dep))
        .filter_map(|dep| {
            dep.output
                .as_ref()
                .filter(|o| !o.is_empty())
                .map(|o| format!("{}: {}", dep.id, o))
        })
        .collect()
}
