use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::sync::{Arc, Mutex};

use taskpilot_core::{EventKind, Orchestrator, PilotConfig, Task, TaskStatus};
use tempfile::TempDir;

fn quiet_config() -> PilotConfig {
    let mut config = PilotConfig::default();
    config.checkpoints.enabled = false;
    config.pipeline.retry_delay_ms = 10;
    config
}

fn run_cli(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_taskpilot"))
        .args(args)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("XDG_DATA_HOME", home.join("data"))
        .env("TASKPILOT_CHECKPOINTS__ENABLED", "false")
        .env_remove("RUST_LOG")
        .env_remove("TASKPILOT_LOG_LEVEL")
        .stdin(Stdio::null())
        .output()
        .expect("Failed to execute taskpilot")
}

mod orchestrated_pipeline_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_decomposed_goal_runs_in_dependency_order() {
        let orchestrator = Orchestrator::builder(quiet_config()).build().await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let seen = order.clone();
        orchestrator.events().subscribe_fn(move |event| {
            if event.kind == EventKind::TaskCompleted {
                if let Some(task) = &event.task_id {
                    seen.lock().unwrap().push(task.clone());
                }
            }
        });

        let result = orchestrator
            .run_pipeline("site", "Create index.html. Then list the files")
            .await
            .unwrap();

        assert!(result.success, "{}", result.reason);
        assert_eq!(result.completed, 2);
        assert_eq!(
            result.task("task-2").unwrap().dependencies,
            vec!["task-1".to_string()]
        );
        assert_eq!(*order.lock().unwrap(), vec!["task-1", "task-2"]);
        assert!(orchestrator.active_keys().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_explicit_graph_with_blocked_branch() {
        let orchestrator = Orchestrator::builder(quiet_config()).build().await.unwrap();

        let tasks = vec![
            Task::new("home", "Create index.html"),
            Task::new("about", "Create about.html"),
            Task::new("check", "List the files").with_dependencies(["home", "about"]),
            Task::new("orphan", "Create contact.html").with_dependencies(["missing"]),
        ];
        let result = orchestrator.run_pipeline_graph("site", tasks).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.completed, 3);
        assert_eq!(result.blocked, 1);
        assert_eq!(result.task("check").unwrap().status, TaskStatus::Completed);
        assert_eq!(result.task("orphan").unwrap().status, TaskStatus::Blocked);
    }
}

mod cli_pipeline_tests {
    use super::*;

    #[test]
    fn test_graph_file_from_cli() {
        let home = TempDir::new().unwrap();
        let graph = home.path().join("graph.yaml");
        std::fs::write(
            &graph,
            "tasks:\n  - id: home\n    description: Create index.html\n  - id: check\n    description: List the files\n    dependencies: [home]\n",
        )
        .unwrap();

        let output = run_cli(
            home.path(),
            &["pipeline", "--graph", graph.to_str().unwrap(), "--format", "json"],
        );
        assert!(
            output.status.success(),
            "{}",
            String::from_utf8_lossy(&output.stderr)
        );

        let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(result["completed"], 2);
    }

    #[test]
    fn test_cyclic_graph_fails() {
        let home = TempDir::new().unwrap();
        let graph = home.path().join("graph.json");
        std::fs::write(
            &graph,
            r#"[
                {"id": "a", "description": "Create a.html", "dependencies": ["b"]},
                {"id": "b", "description": "Create b.html", "dependencies": ["a"]},
                {"id": "c", "description": "Create c.html"}
            ]"#,
        )
        .unwrap();

        let output = run_cli(
            home.path(),
            &["pipeline", "--graph", graph.to_str().unwrap(), "--format", "json"],
        );
        assert!(!output.status.success());

        let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(result["completed"], 1);
        assert_eq!(result["blocked"], 2);
    }

    #[test]
    fn test_goal_or_graph_required() {
        let home = TempDir::new().unwrap();
        let output = run_cli(home.path(), &["pipeline"]);
        assert!(!output.status.success());
    }
}
