use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::types::{is_valid_tool_name, Tool, ToolInfo};
use crate::error::{PilotError, PilotResult};
use crate::models::ToolResult;

/// Type-erased view of a [`Tool`]: JSON in, [`ToolResult`] out.
#[async_trait]
trait ErasedTool: Send + Sync {
    fn info(&self) -> ToolInfo;

    async fn invoke(&self, args: Value) -> ToolResult;
}

struct Bound<T>(T);

#[async_trait]
impl<T: Tool> ErasedTool for Bound<T> {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: self.0.name().to_string(),
            description: self.0.description().to_string(),
            parameters: self.0.parameters(),
        }
    }

    async fn invoke(&self, args: Value) -> ToolResult {
        let name = self.0.name();
        let args = if args.is_null() {
            Value::Object(Default::default())
        } else {
            args
        };

        let typed: T::Args = match serde_json::from_value(args) {
            Ok(typed) => typed,
            Err(e) => {
                return invalid(name, e.to_string());
            }
        };

        if let Err(message) = self.0.validate(&typed) {
            return invalid(name, message);
        }

        match self.0.call(typed).await {
            Ok(result) => result,
            Err(e) => ToolResult::fail(
                PilotError::ToolExecutionFailed {
                    tool: name.to_string(),
                    message: e.to_string(),
                }
                .to_string(),
            ),
        }
    }
}

fn invalid(tool: &str, message: String) -> ToolResult {
    debug!(tool = %tool, "Rejected tool arguments: {}", message);
    ToolResult::fail(
        PilotError::InvalidArguments {
            tool: tool.to_string(),
            message,
        }
        .to_string(),
    )
}

/// Name-keyed dispatch table. Append-only once a run starts; lookups clone
/// the handle out so no lock is held across a tool call.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn ErasedTool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register<T: Tool>(&self, tool: T) -> PilotResult<()> {
        let name = tool.name().to_string();
        if !is_valid_tool_name(&name) {
            return Err(PilotError::InvalidToolName(name));
        }

        let mut tools = self.tools.write().await;
        if tools.contains_key(&name) {
            return Err(PilotError::ToolAlreadyRegistered(name));
        }
        tools.insert(name.clone(), Arc::new(Bound(tool)));

        info!(tool = %name, "Registered tool");
        Ok(())
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(name)
    }

    pub async fn len(&self) -> usize {
        self.tools.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tools.read().await.is_empty()
    }

    /// Validate `args` and run the named tool. Never returns an error:
    /// lookup, validation and handler failures all come back as
    /// `ToolResult { success: false, .. }`.
    pub async fn execute(&self, name: &str, args: Value) -> ToolResult {
        let tool = { self.tools.read().await.get(name).cloned() };

        let Some(tool) = tool else {
            warn!(tool = %name, "Unknown tool requested");
            return ToolResult::fail(PilotError::ToolNotFound(name.to_string()).to_string());
        };

        let start = Instant::now();
        let result = tool.invoke(args).await;
        debug!(
            tool = %name,
            success = result.success,
            duration_ms = start.elapsed().as_millis() as u64,
            "Tool executed"
        );
        result
    }

    pub async fn list_tools(&self) -> Vec<ToolInfo> {
        let tools = self.tools.read().await;
        let mut infos: Vec<ToolInfo> = tools.values().map(|t| t.info()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub async fn tool_names(&self) -> Vec<String> {
        self.list_tools().await.into_iter().map(|t| t.name).collect()
    }

    /// One line per tool, e.g. `- write_file(project: string, path?: string): ...`.
    pub async fn describe_for_prompt(&self) -> String {
        let mut out = String::new();
        for info in self.list_tools().await {
            let params: Vec<String> = info
                .parameters
                .iter()
                .map(|p| {
                    let marker = if p.required { "" } else { "?" };
                    format!("{}{}: {}", p.name, marker, p.kind)
                })
                .collect();
            out.push_str(&format!(
                "- {}({}): {}\n",
                info.name,
                params.join(", "),
                info.description
            ));
        }
        out
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
