use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Blocked,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Blocked
        )
    }

    /// `blocked` is reachable only from pending; an aborted pipeline fails
    /// tasks that never started.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::InProgress)
                | (TaskStatus::Pending, TaskStatus::Blocked)
                | (TaskStatus::Pending, TaskStatus::Failed)
                | (TaskStatus::InProgress, TaskStatus::Completed)
                | (TaskStatus::InProgress, TaskStatus::Failed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Blocked => write!(f, "blocked"),
        }
    }
}

/// Capability class a task is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Coder,
    Tester,
    Designer,
    Researcher,
    #[default]
    Generalist,
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentRole::Coder => write!(f, "coder"),
            AgentRole::Tester => write!(f, "tester"),
            AgentRole::Designer => write!(f, "designer"),
            AgentRole::Researcher => write!(f, "researcher"),
            AgentRole::Generalist => write!(f, "generalist"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub assigned_agent: AgentRole,
    #[serde(default)]
    pub priority: u32,
    #[serde(default = "default_task_status")]
    pub status: TaskStatus,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_task_status() -> TaskStatus {
    TaskStatus::Pending
}

impl Task {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            dependencies: Vec::new(),
            assigned_agent: AgentRole::Generalist,
            priority: 0,
            status: TaskStatus::Pending,
            output: None,
            error: None,
            attempts: 0,
            artifacts: Vec::new(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_agent(mut self, role: AgentRole) -> Self {
        self.assigned_agent = role;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Sequential,
    Parallel,
    Hybrid,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Sequential => write!(f, "sequential"),
            Strategy::Parallel => write!(f, "parallel"),
            Strategy::Hybrid => write!(f, "hybrid"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    #[default]
    Simple,
    Moderate,
    Complex,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Complexity::Simple => write!(f, "simple"),
            Complexity::Moderate => write!(f, "moderate"),
            Complexity::Complex => write!(f, "complex"),
        }
    }
}

/// Output of a task decomposer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decomposition {
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub complexity: Complexity,
}

impl Decomposition {
    /// Derive strategy and complexity from the graph shape.
    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        let with_deps = tasks.iter().filter(|t| !t.dependencies.is_empty()).count();
        let strategy = if tasks.len() <= 1 || with_deps + 1 == tasks.len() {
            Strategy::Sequential
        } else if with_deps == 0 {
            Strategy::Parallel
        } else {
            Strategy::Hybrid
        };
        let complexity = match tasks.len() {
            0..=2 => Complexity::Simple,
            3..=5 => Complexity::Moderate,
            _ => Complexity::Complex,
        };
        Self {
            tasks,
            strategy,
            complexity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_display() {
        assert_eq!(TaskStatus::InProgress.to_string(), "in_progress");
        assert_eq!(TaskStatus::Blocked.to_string(), "blocked");
    }

    #[test]
    fn test_task_transitions() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Blocked));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::InProgress.can_transition_to(TaskStatus::Blocked));
        assert!(!TaskStatus::Blocked.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::InProgress));
    }

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&AgentRole::Researcher).unwrap();
        assert_eq!(json, "\"researcher\"");
        let role: AgentRole = serde_json::from_str("\"designer\"").unwrap();
        assert_eq!(role, AgentRole::Designer);
    }

    #[test]
    fn test_task_from_yaml_defaults() {
        let yaml = "id: b\ndescription: test it\ndependencies: [a]\nassigned_agent: tester\n";
        let task: Task = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.assigned_agent, AgentRole::Tester);
        assert_eq!(task.dependencies, vec!["a".to_string()]);
    }

    #[test]
    fn test_decomposition_shape() {
        let parallel = Decomposition::from_tasks(vec![Task::new("a", "x"), Task::new("b", "y")]);
        assert_eq!(parallel.strategy, Strategy::Parallel);
        assert_eq!(parallel.complexity, Complexity::Simple);

        let chain = Decomposition::from_tasks(vec![
            Task::new("a", "x"),
            Task::new("b", "y").with_dependencies(["a"]),
            Task::new("c", "z").with_dependencies(["b"]),
        ]);
        assert_eq!(chain.strategy, Strategy::Sequential);
        assert_eq!(chain.complexity, Complexity::Moderate);

        let mixed = Decomposition::from_tasks(vec![
            Task::new("a", "x"),
            Task::new("b", "y"),
            Task::new("c", "z").with_dependencies(["a"]),
        ]);
        assert_eq!(mixed.strategy, Strategy::Hybrid);
    }
}
