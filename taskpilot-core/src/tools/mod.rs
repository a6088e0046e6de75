mod builtin;
mod registry;
mod types;

pub use builtin::{
    register_builtin_tools, DeleteFileTool, ListFilesArgs, ListFilesTool, PathArgs, ReadFileTool,
    WriteFileArgs, WriteFileTool, Workspace,
};
pub use registry::ToolRegistry;
pub use types::{is_valid_tool_name, FnTool, ParamType, ParameterSpec, Tool, ToolInfo};
