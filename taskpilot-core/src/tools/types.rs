use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::PilotResult;
use crate::models::ToolResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamType::String => write!(f, "string"),
            ParamType::Integer => write!(f, "integer"),
            ParamType::Number => write!(f, "number"),
            ParamType::Boolean => write!(f, "boolean"),
            ParamType::Array => write!(f, "array"),
            ParamType::Object => write!(f, "object"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
    pub description: String,
    pub required: bool,
}

impl ParameterSpec {
    pub fn required(name: &str, kind: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, kind: ParamType, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

/// Metadata handed to prompt builders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParameterSpec>,
}

impl ToolInfo {
    pub fn has_parameter(&self, name: &str) -> bool {
        self.parameters.iter().any(|p| p.name == name)
    }
}

/// A named capability callable from sandboxed code.
///
/// `Args` is the tool's argument shape. The registry deserializes incoming
/// JSON into it and runs [`Tool::validate`] before [`Tool::call`] is reached,
/// so handlers only ever see well-formed arguments.
#[async_trait]
pub trait Tool: Send + Sync + 'static {
    type Args: DeserializeOwned + Send + 'static;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters(&self) -> Vec<ParameterSpec>;

    fn validate(&self, _args: &Self::Args) -> Result<(), String> {
        Ok(())
    }

    async fn call(&self, args: Self::Args) -> PilotResult<ToolResult>;
}

/// Closure-backed tool for one-off capabilities.
pub struct FnTool<A, F> {
    name: String,
    description: String,
    parameters: Vec<ParameterSpec>,
    validator: Option<Box<dyn Fn(&A) -> Result<(), String> + Send + Sync>>,
    handler: F,
    _args: PhantomData<fn() -> A>,
}

impl<A, F, Fut> FnTool<A, F>
where
    A: DeserializeOwned + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PilotResult<ToolResult>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            validator: None,
            handler,
            _args: PhantomData,
        }
    }

    pub fn with_parameter(mut self, parameter: ParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_validator(
        mut self,
        validator: impl Fn(&A) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }
}

#[async_trait]
impl<A, F, Fut> Tool for FnTool<A, F>
where
    A: DeserializeOwned + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PilotResult<ToolResult>> + Send + 'static,
{
    type Args = A;

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        self.parameters.clone()
    }

    fn validate(&self, args: &A) -> Result<(), String> {
        match &self.validator {
            Some(validator) => validator(args),
            None => Ok(()),
        }
    }

    async fn call(&self, args: A) -> PilotResult<ToolResult> {
        (self.handler)(args).await
    }
}

pub fn is_valid_tool_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_name_validation() {
        assert!(is_valid_tool_name("write_file"));
        assert!(is_valid_tool_name("_private"));
        assert!(is_valid_tool_name("t2"));
        assert!(!is_valid_tool_name(""));
        assert!(!is_valid_tool_name("2fast"));
        assert!(!is_valid_tool_name("write-file"));
        assert!(!is_valid_tool_name("write file"));
    }

    #[test]
    fn test_parameter_spec_serialization() {
        let spec = ParameterSpec::optional("path", ParamType::String, "Relative path");
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["type"], "string");
        assert_eq!(json["required"], false);
    }
}
