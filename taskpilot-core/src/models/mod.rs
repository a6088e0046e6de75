mod result;
mod step;
mod task;

pub use result::{ExecutionResult, ToolResult};
pub use step::{Plan, Step, StepStatus};
pub use task::{AgentRole, Complexity, Decomposition, Strategy, Task, TaskStatus};
