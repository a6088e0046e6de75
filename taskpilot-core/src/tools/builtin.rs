//! Workspace tools bound into every sandbox by default.
//!
//! Files live in an in-memory [`Workspace`] partitioned by project key. The
//! sandbox injects the run's project into every call, so scripts only name
//! paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;

use super::registry::ToolRegistry;
use super::types::{ParamType, ParameterSpec, Tool};
use crate::error::PilotResult;
use crate::models::ToolResult;

#[derive(Debug, Default)]
pub struct Workspace {
    projects: RwLock<HashMap<String, BTreeMap<String, String>>>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn write(&self, project: &str, path: &str, content: &str) {
        let mut projects = self.projects.write().await;
        projects
            .entry(project.to_string())
            .or_default()
            .insert(path.to_string(), content.to_string());
    }

    pub async fn read(&self, project: &str, path: &str) -> Option<String> {
        let projects = self.projects.read().await;
        projects.get(project).and_then(|files| files.get(path).cloned())
    }

    pub async fn list(&self, project: &str) -> Vec<String> {
        let projects = self.projects.read().await;
        projects
            .get(project)
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn delete(&self, project: &str, path: &str) -> bool {
        let mut projects = self.projects.write().await;
        projects
            .get_mut(project)
            .map(|files| files.remove(path).is_some())
            .unwrap_or(false)
    }
}

fn check_project(project: &str) -> Result<(), String> {
    if project.trim().is_empty() {
        return Err("project must not be empty".to_string());
    }
    Ok(())
}

fn check_path(path: &str) -> Result<(), String> {
    if path.trim().is_empty() {
        return Err("path must not be empty".to_string());
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return Err(format!("path '{}' must be relative", path));
    }
    if path.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(format!("path '{}' must not contain '..'", path));
    }
    Ok(())
}

fn project_param() -> ParameterSpec {
    ParameterSpec::required("project", ParamType::String, "Project key (injected)")
}

fn path_param() -> ParameterSpec {
    ParameterSpec::required("path", ParamType::String, "Relative file path")
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriteFileArgs {
    pub project: String,
    pub path: String,
    pub content: String,
}

pub struct WriteFileTool {
    workspace: Arc<Workspace>,
}

impl WriteFileTool {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    type Args = WriteFileArgs;

    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file in the project workspace"
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![
            project_param(),
            path_param(),
            ParameterSpec::required("content", ParamType::String, "Full file content"),
        ]
    }

    fn validate(&self, args: &WriteFileArgs) -> Result<(), String> {
        check_project(&args.project)?;
        check_path(&args.path)
    }

    async fn call(&self, args: WriteFileArgs) -> PilotResult<ToolResult> {
        self.workspace
            .write(&args.project, &args.path, &args.content)
            .await;
        Ok(ToolResult::ok(format!(
            "Wrote {} bytes to {}",
            args.content.len(),
            args.path
        ))
        .with_artifact(args.path))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathArgs {
    pub project: String,
    pub path: String,
}

pub struct ReadFileTool {
    workspace: Arc<Workspace>,
}

impl ReadFileTool {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    type Args = PathArgs;

    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the project workspace"
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![project_param(), path_param()]
    }

    fn validate(&self, args: &PathArgs) -> Result<(), String> {
        check_project(&args.project)?;
        check_path(&args.path)
    }

    async fn call(&self, args: PathArgs) -> PilotResult<ToolResult> {
        Ok(match self.workspace.read(&args.project, &args.path).await {
            Some(content) => ToolResult::ok(content),
            None => ToolResult::fail(format!("File not found: {}", args.path)),
        })
    }
}

pub struct DeleteFileTool {
    workspace: Arc<Workspace>,
}

impl DeleteFileTool {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for DeleteFileTool {
    type Args = PathArgs;

    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file from the project workspace"
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![project_param(), path_param()]
    }

    fn validate(&self, args: &PathArgs) -> Result<(), String> {
        check_project(&args.project)?;
        check_path(&args.path)
    }

    async fn call(&self, args: PathArgs) -> PilotResult<ToolResult> {
        Ok(if self.workspace.delete(&args.project, &args.path).await {
            ToolResult::ok(format!("Deleted {}", args.path))
        } else {
            ToolResult::fail(format!("File not found: {}", args.path))
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListFilesArgs {
    pub project: String,
}

pub struct ListFilesTool {
    workspace: Arc<Workspace>,
}

impl ListFilesTool {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    type Args = ListFilesArgs;

    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List file paths in the project workspace"
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![project_param()]
    }

    fn validate(&self, args: &ListFilesArgs) -> Result<(), String> {
        check_project(&args.project)
    }

    async fn call(&self, args: ListFilesArgs) -> PilotResult<ToolResult> {
        let files = self.workspace.list(&args.project).await;
        Ok(ToolResult::ok(files.join("\n")))
    }
}

pub async fn register_builtin_tools(
    registry: &ToolRegistry,
    workspace: Arc<Workspace>,
) -> PilotResult<()> {
    registry
        .register(WriteFileTool::new(workspace.clone()))
        .await?;
    registry.register(ReadFileTool::new(workspace.clone())).await?;
    registry
        .register(ListFilesTool::new(workspace.clone()))
        .await?;
    registry.register(DeleteFileTool::new(workspace)).await?;
    Ok(())
}
