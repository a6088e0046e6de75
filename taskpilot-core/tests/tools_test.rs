use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use taskpilot_core::models::ToolResult;
use taskpilot_core::tools::{
    register_builtin_tools, FnTool, ParamType, ParameterSpec, ToolRegistry, Workspace,
};
use taskpilot_core::PilotError;

#[derive(Debug, Deserialize)]
struct GreetArgs {
    name: String,
    #[serde(default)]
    excited: bool,
}

fn greet_tool() -> impl taskpilot_core::tools::Tool {
    FnTool::new("greet", "Say hello", |args: GreetArgs| async move {
        let mark = if args.excited { "!" } else { "." };
        Ok(ToolResult::ok(format!("Hello, {}{}", args.name, mark)))
    })
    .with_parameter(ParameterSpec::required("name", ParamType::String, "Who to greet"))
    .with_parameter(ParameterSpec::optional("excited", ParamType::Boolean, "Add emphasis"))
    .with_validator(|args: &GreetArgs| {
        if args.name.trim().is_empty() {
            Err("name must not be empty".to_string())
        } else {
            Ok(())
        }
    })
}

mod registry_tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_tool_round_trip() {
        let registry = ToolRegistry::new();
        registry.register(greet_tool()).await.unwrap();

        let result = registry
            .execute("greet", json!({"name": "Ada", "excited": true}))
            .await;
        assert!(result.success);
        assert_eq!(result.output, "Hello, Ada!");
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_validator_runs_before_handler() {
        let registry = ToolRegistry::new();
        registry.register(greet_tool()).await.unwrap();

        let result = registry.execute("greet", json!({"name": "  "})).await;
        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.contains("E1003"), "{}", error);
        assert!(error.contains("name must not be empty"));
    }

    #[tokio::test]
    async fn test_wrong_shape_is_rejected() {
        let registry = ToolRegistry::new();
        registry.register(greet_tool()).await.unwrap();

        let result = registry.execute("greet", json!({"name": 42})).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("E1003"));
    }

    #[tokio::test]
    async fn test_handler_error_becomes_failed_result() {
        let registry = ToolRegistry::new();
        registry
            .register(FnTool::new(
                "explode",
                "Always fails",
                |_args: serde_json::Value| async move {
                    Err(PilotError::internal("boom"))
                },
            ))
            .await
            .unwrap();

        let result = registry.execute("explode", json!({})).await;
        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.contains("E1004"));
        assert!(error.contains("boom"));
    }

    #[tokio::test]
    async fn test_unknown_tool_and_duplicates() {
        let registry = ToolRegistry::new();
        registry.register(greet_tool()).await.unwrap();

        let missing = registry.execute("nope", json!({})).await;
        assert!(!missing.success);
        assert!(missing.error.unwrap().contains("E1001"));

        let duplicate = registry.register(greet_tool()).await;
        assert!(matches!(duplicate, Err(PilotError::ToolAlreadyRegistered(_))));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_builtin_catalogue() {
        let registry = ToolRegistry::new();
        register_builtin_tools(&registry, Arc::new(Workspace::new()))
            .await
            .unwrap();

        assert_eq!(
            registry.tool_names().await,
            vec!["delete_file", "list_files", "read_file", "write_file"]
        );

        let prompt = registry.describe_for_prompt().await;
        assert!(prompt.contains(
            "- write_file(project: string, path: string, content: string): Create or overwrite a file in the project workspace"
        ));
        assert_eq!(prompt.lines().count(), 4);
    }
}

mod workspace_tests {
    use super::*;

    #[tokio::test]
    async fn test_list_is_sorted_per_project() {
        let workspace = Workspace::new();
        workspace.write("site", "b.txt", "b").await;
        workspace.write("site", "a.txt", "a").await;
        workspace.write("other", "c.txt", "c").await;

        assert_eq!(workspace.list("site").await, vec!["a.txt", "b.txt"]);
        assert_eq!(workspace.list("other").await, vec!["c.txt"]);
        assert!(workspace.list("missing").await.is_empty());
    }

    #[tokio::test]
    async fn test_overwrite_and_delete() {
        let workspace = Workspace::new();
        workspace.write("site", "a.txt", "one").await;
        workspace.write("site", "a.txt", "two").await;

        assert_eq!(workspace.read("site", "a.txt").await.as_deref(), Some("two"));
        assert!(workspace.delete("site", "a.txt").await);
        assert!(!workspace.delete("site", "a.txt").await);
    }
}
