use serde::{Deserialize, Serialize};

/// Uniform outcome of every tool call and sandbox run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            artifacts: Vec::new(),
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifact(mut self, artifact: impl Into<String>) -> Self {
        self.artifacts.push(artifact.into());
        self
    }
}

/// Outcome of one sandbox run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ExecutionResult {
    pub code: String,
    pub output: String,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Tool names in call order, repeats included.
    #[serde(default)]
    pub tools_invoked: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_value: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn timed_out(&self) -> bool {
        self.error.as_deref() == Some(crate::sandbox::TIMEOUT_ERROR)
    }

    /// Collapse into the effect-boundary shape surfaced to the plan layer.
    pub fn to_tool_result(&self) -> ToolResult {
        ToolResult {
            success: self.is_success(),
            output: self.output.clone(),
            error: self.error.clone(),
            artifacts: self.artifacts.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_result_constructors() {
        let ok = ToolResult::ok("done").with_artifact("index.html");
        assert!(ok.success);
        assert_eq!(ok.artifacts, vec!["index.html".to_string()]);

        let fail = ToolResult::fail("boom");
        assert!(!fail.success);
        assert_eq!(fail.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_tool_result_serialization_skips_empty() {
        let json = serde_json::to_value(ToolResult::ok("x")).unwrap();
        assert!(json.get("error").is_none());
        assert!(json.get("artifacts").is_none());
    }

    #[test]
    fn test_execution_result_collapse() {
        let exec = ExecutionResult {
            code: "1".to_string(),
            output: "=> 1".to_string(),
            error: Some("timed out".to_string()),
            ..Default::default()
        };
        assert!(!exec.is_success());
        assert!(exec.timed_out());
        let result = exec.to_tool_result();
        assert!(!result.success);
        assert_eq!(result.output, "=> 1");
    }
}
