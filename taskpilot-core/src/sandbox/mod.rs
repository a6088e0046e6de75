mod capture;
mod executor;

pub use capture::{LogCapture, LogLevel, LogLine};
pub use executor::{
    escape_string_literal, AbortSignal, SandboxExecutor, ToolBindings, ABORTED_ERROR, TIMEOUT_ERROR,
};
