use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use taskpilot_core::{AgentEvent, EventKind, Plan, StepStatus, Task, TaskStatus};

pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h).fg(Color::White))
                .collect::<Vec<_>>(),
        );
    table
}

pub fn step_status_cell(status: StepStatus) -> Cell {
    let color = match status {
        StepStatus::Pending => Color::DarkGrey,
        StepStatus::Running => Color::Cyan,
        StepStatus::Completed => Color::Green,
        StepStatus::Failed => Color::Red,
        StepStatus::Skipped => Color::Yellow,
    };
    Cell::new(status.to_string()).fg(color)
}

pub fn task_status_cell(status: TaskStatus) -> Cell {
    let color = match status {
        TaskStatus::Pending => Color::DarkGrey,
        TaskStatus::InProgress => Color::Cyan,
        TaskStatus::Completed => Color::Green,
        TaskStatus::Failed => Color::Red,
        TaskStatus::Blocked => Color::Yellow,
    };
    Cell::new(status.to_string()).fg(color)
}

/// First line of `text`, cut to `max` characters.
pub fn first_line(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or("");
    if line.chars().count() > max {
        let cut: String = line.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        line.to_string()
    }
}

pub fn plan_table(plan: &Plan) -> Table {
    let mut table = new_table(&["Step", "Status", "Description", "Result"]);
    for step in &plan.steps {
        let detail = step
            .error
            .as_deref()
            .or(step.output.as_deref())
            .map(|t| first_line(t, 60))
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(&step.id),
            step_status_cell(step.status),
            Cell::new(first_line(&step.description, 60)),
            Cell::new(detail),
        ]);
    }
    table
}

pub fn task_table(tasks: &[Task]) -> Table {
    let mut table = new_table(&["Task", "Agent", "Status", "Attempts", "Depends on", "Result"]);
    for task in tasks {
        let detail = task
            .error
            .as_deref()
            .or(task.output.as_deref())
            .map(|t| first_line(t, 60))
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(&task.id),
            Cell::new(task.assigned_agent.to_string()),
            task_status_cell(task.status),
            Cell::new(task.attempts),
            Cell::new(task.dependencies.join(", ")),
            Cell::new(detail),
        ]);
    }
    table
}

/// One progress line per interesting event; chatty kinds are skipped.
pub fn print_event(event: &AgentEvent) {
    let scope = match (&event.task_id, &event.step_id) {
        (Some(task), Some(step)) => format!("[{}/{}]", task, step),
        (Some(task), None) => format!("[{}]", task),
        (None, Some(step)) => format!("[{}]", step),
        (None, None) => String::new(),
    };
    let message = first_line(&event.message, 100);

    let line = match event.kind {
        EventKind::Plan => format!("{} {}", "plan".cyan().bold(), message),
        EventKind::StepStarted => format!("{} {} {}", "start".cyan(), scope.dimmed(), message),
        EventKind::StepCompleted => format!("{} {} {}", "done".green(), scope.dimmed(), message),
        EventKind::StepFailed => format!("{} {} {}", "fail".red(), scope.dimmed(), message),
        EventKind::Correction => format!("{} {} {}", "retry".yellow(), scope.dimmed(), message),
        EventKind::StuckDetected => format!("{} {} {}", "stuck".yellow().bold(), scope.dimmed(), message),
        EventKind::Checkpoint => format!("{} {} {}", "saved".blue(), scope.dimmed(), message),
        EventKind::TaskStarted => format!("{} {} {}", "task".cyan().bold(), scope.dimmed(), message),
        EventKind::TaskCompleted => format!("{} {} {}", "task done".green().bold(), scope.dimmed(), message),
        EventKind::TaskFailed => format!("{} {} {}", "task failed".red().bold(), scope.dimmed(), message),
        EventKind::TaskBlocked => format!("{} {} {}", "blocked".yellow().bold(), scope.dimmed(), message),
        EventKind::TaskRetry => format!("{} {} {}", "task retry".yellow(), scope.dimmed(), message),
        EventKind::Error => format!("{} {} {}", "error".red().bold(), scope.dimmed(), message),
        _ => return,
    };
    eprintln!("{}", line);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_line() {
        assert_eq!(first_line("one\ntwo", 10), "one");
        assert_eq!(first_line("abcdefghij", 6), "abc...");
        assert_eq!(first_line("", 6), "");
    }
}
