use chrono::Utc;

use crate::error::{PilotError, PilotResult};
use crate::models::{Plan, Step, StepStatus};

const RETRY_MARKER: &str = " (retry after: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlanProgress {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl PlanProgress {
    pub fn percent_done(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.completed + self.skipped) as f64 * 100.0 / self.total as f64
    }
}

/// First pending step in declared order.
pub fn next_step(plan: &Plan) -> Option<&Step> {
    plan.steps.iter().find(|s| s.status == StepStatus::Pending)
}

pub fn running_step(plan: &Plan) -> Option<&Step> {
    plan.steps.iter().find(|s| s.status == StepStatus::Running)
}

/// True iff every step is completed, skipped, or failed with a retry chain
/// that ends completed or skipped.
pub fn is_complete(plan: &Plan) -> bool {
    plan.steps.iter().all(|s| is_resolved(plan, s, 0))
}

fn is_resolved(plan: &Plan, step: &Step, depth: usize) -> bool {
    match step.status {
        StepStatus::Completed | StepStatus::Skipped => true,
        StepStatus::Failed if depth <= plan.steps.len() => plan
            .steps
            .iter()
            .filter(|r| r.retry_of.as_deref() == Some(step.id.as_str()))
            .any(|r| is_resolved(plan, r, depth + 1)),
        _ => false,
    }
}

pub fn progress(plan: &Plan) -> PlanProgress {
    let mut progress = PlanProgress {
        total: plan.steps.len(),
        ..Default::default()
    };
    for step in &plan.steps {
        match step.status {
            StepStatus::Pending => progress.pending += 1,
            StepStatus::Running => progress.running += 1,
            StepStatus::Completed => progress.completed += 1,
            StepStatus::Failed => progress.failed += 1,
            StepStatus::Skipped => progress.skipped += 1,
        }
    }
    progress
}

/// Rebuild `plan` with one step moved to `next` and edited by `edit`.
fn transition(
    plan: &Plan,
    step_id: &str,
    next: StepStatus,
    edit: impl FnOnce(&mut Step),
) -> PilotResult<Plan> {
    let index = plan
        .position(step_id)
        .ok_or_else(|| PilotError::StepNotFound(step_id.to_string()))?;

    let current = plan.steps[index].status;
    if !current.can_transition_to(next) {
        return Err(PilotError::InvalidStepTransition {
            step: step_id.to_string(),
            from: current.to_string(),
            to: next.to_string(),
        });
    }

    let mut updated = plan.clone();
    let step = &mut updated.steps[index];
    step.status = next;
    edit(step);
    updated.updated_at = Utc::now();
    Ok(updated)
}

pub fn mark_running(plan: &Plan, step_id: &str) -> PilotResult<Plan> {
    if let Some(running) = running_step(plan) {
        return Err(PilotError::StepAlreadyRunning {
            running: running.id.clone(),
            requested: step_id.to_string(),
        });
    }
    transition(plan, step_id, StepStatus::Running, |step| {
        step.started_at = Some(Utc::now());
    })
}

pub fn mark_complete(plan: &Plan, step_id: &str, output: impl Into<String>) -> PilotResult<Plan> {
    let output = output.into();
    transition(plan, step_id, StepStatus::Completed, |step| {
        step.output = Some(output);
        step.error = None;
        step.completed_at = Some(Utc::now());
    })
}

pub fn mark_failed(plan: &Plan, step_id: &str, error: impl Into<String>) -> PilotResult<Plan> {
    let error = error.into();
    transition(plan, step_id, StepStatus::Failed, |step| {
        step.error = Some(error);
        step.completed_at = Some(Utc::now());
    })
}

pub fn mark_skipped(plan: &Plan, step_id: &str) -> PilotResult<Plan> {
    transition(plan, step_id, StepStatus::Skipped, |step| {
        step.completed_at = Some(Utc::now());
    })
}

fn base_description(description: &str) -> &str {
    description
        .split(RETRY_MARKER)
        .next()
        .unwrap_or(description)
}

fn retry_id(plan: &Plan, failed_id: &str) -> String {
    let mut n = 1;
    loop {
        let candidate = format!("{}-retry-{}", failed_id, n);
        if plan.step(&candidate).is_none() {
            return candidate;
        }
        n += 1;
    }
}

/// Fail `failed_step_id` with `obstacle` and insert a pending retry step
/// right after it.
///
/// The target may be pending (retired without running), running, or already
/// failed; in the last case only its error text is replaced. The retry step
/// inherits tool hints and the checkpoint flag, has no dependencies, and
/// records the failed step in `retry_of`.
pub fn revise(plan: &Plan, obstacle: &str, failed_step_id: &str) -> PilotResult<Plan> {
    let index = plan
        .position(failed_step_id)
        .ok_or_else(|| PilotError::StepNotFound(failed_step_id.to_string()))?;

    let mut revised = match plan.steps[index].status {
        StepStatus::Failed => {
            let mut copy = plan.clone();
            copy.steps[index].error = Some(obstacle.to_string());
            copy
        }
        _ => mark_failed(plan, failed_step_id, obstacle)?,
    };

    let failed = &revised.steps[index];
    let mut retry = Step::new(
        retry_id(&revised, failed_step_id),
        format!(
            "{}{}{})",
            base_description(&failed.description),
            RETRY_MARKER,
            obstacle
        ),
    )
    .with_tool_hints(failed.tool_hints.clone())
    .with_checkpoint(failed.checkpoint);
    retry.retry_of = Some(failed_step_id.to_string());

    revised.steps.insert(index + 1, retry);
    revised.updated_at = Utc::now();
    Ok(revised)
}
