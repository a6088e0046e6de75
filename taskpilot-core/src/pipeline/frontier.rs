use std::collections::{HashMap, HashSet};

use crate::models::{Task, TaskStatus};

/// Indices of pending tasks whose dependencies have all completed, in graph
/// order.
pub fn ready_frontier(tasks: &[Task]) -> Vec<usize> {
    let completed: HashSet<&str> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .map(|t| t.id.as_str())
        .collect();

    tasks
        .iter()
        .enumerate()
        .filter(|(_, t)| t.status == TaskStatus::Pending)
        .filter(|(_, t)| t.dependencies.iter().all(|d| completed.contains(d.as_str())))
        .map(|(i, _)| i)
        .collect()
}

/// First id that appears more than once.
pub fn find_duplicate(tasks: &[Task]) -> Option<&str> {
    let mut seen = HashSet::new();
    tasks
        .iter()
        .map(|t| t.id.as_str())
        .find(|id| !seen.insert(*id))
}

/// Pending tasks that sit on a dependency cycle among pending tasks.
pub fn cyclic_tasks(tasks: &[Task]) -> HashSet<String> {
    let pending: HashMap<&str, &Task> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Pending)
        .map(|t| (t.id.as_str(), t))
        .collect();

    pending
        .keys()
        .copied()
        .filter(|&id| reaches(&pending, id, id))
        .map(str::to_string)
        .collect()
}

fn reaches<'a>(pending: &HashMap<&'a str, &'a Task>, from: &'a str, target: &str) -> bool {
    let mut stack: Vec<&'a str> = vec![from];
    let mut visited: HashSet<&'a str> = HashSet::new();

    while let Some(id) = stack.pop() {
        let Some(&task) = pending.get(id) else {
            continue;
        };
        for dep in &task.dependencies {
            if dep == target {
                return true;
            }
            if visited.insert(dep.as_str()) {
                stack.push(dep.as_str());
            }
        }
    }
    false
}

/// Why a pending task can never become ready once the frontier is empty.
pub fn explain_blocked(tasks: &[Task], index: usize, cyclic: &HashSet<String>) -> String {
    let task = &tasks[index];
    let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let mut reasons = Vec::new();

    let missing: Vec<&str> = task
        .dependencies
        .iter()
        .filter(|d| !by_id.contains_key(d.as_str()))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        reasons.push(format!("missing dependencies: {}", missing.join(", ")));
    }

    if cyclic.contains(&task.id) {
        let members: Vec<&str> = task
            .dependencies
            .iter()
            .filter(|d| cyclic.contains(d.as_str()))
            .map(String::as_str)
            .collect();
        reasons.push(format!("dependency cycle through: {}", members.join(", ")));
    }

    let unfinished: Vec<String> = task
        .dependencies
        .iter()
        .filter_map(|d| by_id.get(d.as_str()))
        .filter(|dep| dep.status.is_terminal() && dep.status != TaskStatus::Completed)
        .map(|dep| format!("{} ({})", dep.id, dep.status))
        .collect();
    if !unfinished.is_empty() {
        reasons.push(format!("dependencies did not complete: {}", unfinished.join(", ")));
    }

    if reasons.is_empty() {
        let waiting: Vec<&str> = task
            .dependencies
            .iter()
            .filter(|d| {
                by_id
                    .get(d.as_str())
                    .map(|dep| dep.status != TaskStatus::Completed)
                    .unwrap_or(false)
            })
            .map(String::as_str)
            .collect();
        reasons.push(format!("waiting on unsatisfiable tasks: {}", waiting.join(", ")));
    }

    reasons.join("; ")
}
