//! Error types for the Taskpilot core library.
//!
//! Every fallible operation in the engine returns [`PilotResult`]. Tool and
//! sandbox failures are normalized into result values before they cross a
//! component boundary; the variants below are what remains for bookkeeping
//! faults, configuration problems and the terminal reasons of a run.
//!
//! # Error Codes Reference
//!
//! | Code Range | Category | Description |
//! |------------|----------|-------------|
//! | E1001-E1099 | Tool | Registration, lookup and argument validation |
//! | E2001-E2099 | Config | Config file, environment and validation errors |
//! | E3001-E3099 | Sandbox | Script runtime failures and execution timeouts |
//! | E4001-E4099 | Plan | Step lookup and status transition errors |
//! | E5001-E5099 | Agent | Loop termination, stalls, approval and human waits |
//! | E6001-E6099 | Pipeline | Decomposition and dependency graph errors |
//! | E7001-E7099 | Checkpoint | Durable snapshot save/load errors |
//! | E9001-E9099 | General | Internal, IO, serialization and validation errors |

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Configuration for retry behavior with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first one)
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 for doubling)
    pub backoff_multiplier: f64,
    /// Whether to add jitter to prevent thundering herd
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Retry policy for durable checkpoint writes.
    pub fn for_checkpoint() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Backoff between attempts of a pipeline task.
    pub fn for_task(initial_delay_ms: u64, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(initial_delay_ms),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.jitter {
            // Add random jitter up to 25% of the delay
            let jitter_factor = 1.0 + (rand_jitter() * 0.25);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }
}

/// Returns a value between 0.0 and 1.0 derived from the clock.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// The main error type for the Taskpilot core library.
#[derive(Debug, Error)]
pub enum PilotError {
    // ========================================================================
    // Tool Errors (E1001-E1099)
    // ========================================================================
    /// No tool registered under the requested name
    #[error("[E1001] Tool not found: {0}")]
    ToolNotFound(String),

    /// A tool with this name already exists in the registry
    #[error("[E1002] Tool already registered: {0}")]
    ToolAlreadyRegistered(String),

    /// Arguments failed the tool's declared shape or validator
    #[error("[E1003] Invalid arguments for tool '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },

    /// The tool handler itself reported a failure
    #[error("[E1004] Tool '{tool}' failed: {message}")]
    ToolExecutionFailed { tool: String, message: String },

    /// Tool names must be usable as script identifiers
    #[error("[E1005] Invalid tool name '{0}': must match [A-Za-z_][A-Za-z0-9_]*")]
    InvalidToolName(String),

    // ========================================================================
    // Configuration Errors (E2001-E2099)
    // ========================================================================
    /// Configuration file parse error
    #[error("[E2001] Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// Invalid configuration value
    #[error("[E2002] Invalid configuration value for '{key}': {message}")]
    InvalidConfigValue { key: String, message: String },

    /// Configuration error (generic)
    #[error("[E2003] Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // Sandbox Errors (E3001-E3099)
    // ========================================================================
    /// Script raised a runtime error
    #[error("[E3001] Execution failed: {0}")]
    ExecutionFailed(String),

    /// Script exceeded its time budget
    #[error("[E3002] Execution timed out after {0} ms")]
    ExecutionTimeout(u64),

    /// The blocking worker running the script panicked
    #[error("[E3003] Sandbox worker crashed: {0}")]
    SandboxCrashed(String),

    // ========================================================================
    // Plan Errors (E4001-E4099)
    // ========================================================================
    /// Step id not present in the plan
    #[error("[E4001] Step not found: {0}")]
    StepNotFound(String),

    /// Status change would move a step backwards
    #[error("[E4002] Invalid status transition for step '{step}' from {from} to {to}")]
    InvalidStepTransition {
        step: String,
        from: String,
        to: String,
    },

    /// Another step of the same plan is in flight
    #[error("[E4003] Cannot start step '{requested}': step '{running}' is still running")]
    StepAlreadyRunning { running: String, requested: String },

    /// Plan generator returned no steps
    #[error("[E4004] Plan for goal '{0}' has no steps")]
    EmptyPlan(String),

    // ========================================================================
    // Agent Errors (E5001-E5099)
    // ========================================================================
    /// The same step was attempted repeatedly without progress
    #[error("[E5001] Stalled on step '{step}' after {repeats} identical attempts")]
    Stalled { step: String, repeats: usize },

    /// Plan proposal was rejected by the reviewer
    #[error("[E5002] Plan rejected: {0}")]
    ApprovalRejected(String),

    /// Run exceeded its wall-clock budget
    #[error("[E5003] Run timed out after {0} minutes")]
    RunTimeout(u64),

    /// Run exceeded its iteration budget
    #[error("[E5004] Maximum iterations reached: {0}")]
    MaxIterationsReached(u32),

    /// Run exhausted its retry budget
    #[error("[E5005] Maximum retries reached: {0}")]
    MaxRetriesReached(u32),

    /// Run was aborted by its owner
    #[error("[E5006] Run aborted: {0}")]
    Aborted(String),

    /// approve/reject/answer called with nothing waiting
    #[error("[E5007] No pending {0} request")]
    NoPendingRequest(String),

    /// Plan or code generation collaborator failed
    #[error("[E5008] Generation failed: {0}")]
    GenerationFailed(String),

    // ========================================================================
    // Pipeline Errors (E6001-E6099)
    // ========================================================================
    /// Task can never become ready
    #[error("[E6001] Task '{task}' has unsatisfiable dependencies: {missing}")]
    DependencyUnsatisfiable { task: String, missing: String },

    /// Two tasks share the same id
    #[error("[E6002] Duplicate task id: {0}")]
    DuplicateTask(String),

    /// Task decomposition collaborator failed
    #[error("[E6003] Task decomposition failed: {0}")]
    DecompositionFailed(String),

    // ========================================================================
    // Checkpoint Errors (E7001-E7099)
    // ========================================================================
    /// No checkpoint stored under this id
    #[error("[E7001] Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    /// Checkpoint could not be written
    #[error("[E7002] Checkpoint save failed: {0}")]
    CheckpointFailed(String),

    // ========================================================================
    // General Errors (E9001-E9099)
    // ========================================================================
    /// Internal error (catch-all for unexpected conditions)
    #[error("[E9001] Internal error: {0}")]
    Internal(String),

    /// Operation not supported
    #[error("[E9002] Operation not supported: {0}")]
    NotSupported(String),

    /// Resource already exists
    #[error("[E9003] Resource already exists: {0}")]
    AlreadyExists(String),

    /// Validation error
    #[error("[E9004] Validation error: {0}")]
    ValidationError(String),

    /// IO error
    #[error("[E9005] IO error: {0}")]
    IoError(String),

    /// Serialization/deserialization error
    #[error("[E9006] Serialization error: {0}")]
    SerializationError(String),
}

/// Result type alias for Taskpilot operations.
pub type PilotResult<T> = Result<T, PilotError>;

// ============================================================================
// From trait implementations for seamless error propagation
// ============================================================================

impl From<serde_json::Error> for PilotError {
    fn from(err: serde_json::Error) -> Self {
        PilotError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for PilotError {
    fn from(err: serde_yaml::Error) -> Self {
        PilotError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for PilotError {
    fn from(err: std::io::Error) -> Self {
        PilotError::IoError(err.to_string())
    }
}

impl From<config::ConfigError> for PilotError {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::NotFound(key) => PilotError::InvalidConfigValue {
                key,
                message: "Key not found".to_string(),
            },
            config::ConfigError::FileParse { uri, cause } => PilotError::ConfigParseError(
                format!("Failed to parse {}: {}", uri.unwrap_or_default(), cause),
            ),
            config::ConfigError::Type {
                origin,
                unexpected,
                expected,
                key,
            } => PilotError::InvalidConfigValue {
                key: key.unwrap_or_else(|| origin.map(|o| o.to_string()).unwrap_or_default()),
                message: format!("Expected {}, got {}", expected, unexpected),
            },
            _ => PilotError::ConfigParseError(err.to_string()),
        }
    }
}

// ============================================================================
// Error categorization helpers
// ============================================================================

impl PilotError {
    /// Returns true if this error came from the tool layer.
    pub fn is_tool_error(&self) -> bool {
        matches!(
            self,
            PilotError::ToolNotFound(_)
                | PilotError::ToolAlreadyRegistered(_)
                | PilotError::InvalidArguments { .. }
                | PilotError::ToolExecutionFailed { .. }
                | PilotError::InvalidToolName(_)
        )
    }

    /// Returns true if this error is related to configuration.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            PilotError::ConfigParseError(_)
                | PilotError::InvalidConfigValue { .. }
                | PilotError::Config(_)
        )
    }

    /// Returns true if this error came from running sandboxed code.
    pub fn is_execution_error(&self) -> bool {
        matches!(
            self,
            PilotError::ExecutionFailed(_)
                | PilotError::ExecutionTimeout(_)
                | PilotError::SandboxCrashed(_)
        )
    }

    /// Returns true if this error reports a violated plan invariant.
    pub fn is_plan_error(&self) -> bool {
        matches!(
            self,
            PilotError::StepNotFound(_)
                | PilotError::InvalidStepTransition { .. }
                | PilotError::StepAlreadyRunning { .. }
                | PilotError::EmptyPlan(_)
        )
    }

    /// Returns true if this error terminates a run on a budget or deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            PilotError::ExecutionTimeout(_) | PilotError::RunTimeout(_)
        )
    }

    /// Returns true if this error is transient and the operation might succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PilotError::IoError(_)
                | PilotError::CheckpointFailed(_)
                | PilotError::ExecutionTimeout(_)
                | PilotError::GenerationFailed(_)
        )
    }

    /// Returns an error code suitable for logging or external reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            PilotError::ToolNotFound(_) => "E1001",
            PilotError::ToolAlreadyRegistered(_) => "E1002",
            PilotError::InvalidArguments { .. } => "E1003",
            PilotError::ToolExecutionFailed { .. } => "E1004",
            PilotError::InvalidToolName(_) => "E1005",
            PilotError::ConfigParseError(_) => "E2001",
            PilotError::InvalidConfigValue { .. } => "E2002",
            PilotError::Config(_) => "E2003",
            PilotError::ExecutionFailed(_) => "E3001",
            PilotError::ExecutionTimeout(_) => "E3002",
            PilotError::SandboxCrashed(_) => "E3003",
            PilotError::StepNotFound(_) => "E4001",
            PilotError::InvalidStepTransition { .. } => "E4002",
            PilotError::StepAlreadyRunning { .. } => "E4003",
            PilotError::EmptyPlan(_) => "E4004",
            PilotError::Stalled { .. } => "E5001",
            PilotError::ApprovalRejected(_) => "E5002",
            PilotError::RunTimeout(_) => "E5003",
            PilotError::MaxIterationsReached(_) => "E5004",
            PilotError::MaxRetriesReached(_) => "E5005",
            PilotError::Aborted(_) => "E5006",
            PilotError::NoPendingRequest(_) => "E5007",
            PilotError::GenerationFailed(_) => "E5008",
            PilotError::DependencyUnsatisfiable { .. } => "E6001",
            PilotError::DuplicateTask(_) => "E6002",
            PilotError::DecompositionFailed(_) => "E6003",
            PilotError::CheckpointNotFound(_) => "E7001",
            PilotError::CheckpointFailed(_) => "E7002",
            PilotError::Internal(_) => "E9001",
            PilotError::NotSupported(_) => "E9002",
            PilotError::AlreadyExists(_) => "E9003",
            PilotError::ValidationError(_) => "E9004",
            PilotError::IoError(_) => "E9005",
            PilotError::SerializationError(_) => "E9006",
        }
    }

    /// Returns a user-friendly suggestion for how to resolve this error.
    pub fn user_suggestion(&self) -> Option<&'static str> {
        match self {
            PilotError::ToolNotFound(_) => Some("Run 'taskpilot tools' to see registered tools"),
            PilotError::InvalidArguments { .. } => {
                Some("Check the tool's parameter list with 'taskpilot tools'")
            }
            PilotError::ConfigParseError(_) | PilotError::InvalidConfigValue { .. } => {
                Some("Run 'taskpilot config' to inspect the effective configuration")
            }
            PilotError::ExecutionTimeout(_) => {
                Some("Raise sandbox.default_timeout_ms or split the step into smaller steps")
            }
            PilotError::RunTimeout(_) => Some("Raise agent.timeout_minutes for long goals"),
            PilotError::MaxIterationsReached(_) => {
                Some("Raise agent.max_iterations or simplify the goal")
            }
            PilotError::CheckpointNotFound(_) => {
                Some("Run 'taskpilot checkpoints list' to see stored checkpoints")
            }
            _ => None,
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        PilotError::ValidationError(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        PilotError::Internal(message.into())
    }

    /// Log this error with appropriate severity level.
    pub fn log(&self) {
        let code = self.error_code();
        let suggestion = self.user_suggestion();

        if self.is_transient() {
            warn!(
                error_code = %code,
                suggestion = suggestion,
                "Transient error occurred: {}",
                self
            );
        } else {
            error!(
                error_code = %code,
                suggestion = suggestion,
                "Error occurred: {}",
                self
            );
        }
    }

}

// ============================================================================
// Retry utilities
// ============================================================================

/// Execute an async operation, retrying transient failures per `config`.
pub async fn retry_async_with_config<F, Fut, T>(
    operation: F,
    config: RetryConfig,
) -> PilotResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = PilotResult<T>>,
{
    let mut last_error = None;

    for attempt in 0..config.max_attempts {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    info!(
                        "Operation succeeded on attempt {} after {} retries",
                        attempt + 1,
                        attempt
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if !e.is_transient() || attempt + 1 >= config.max_attempts {
                    e.log();
                    return Err(e);
                }

                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "Attempt {} failed ({}), retrying in {:?}",
                    attempt + 1,
                    e,
                    delay
                );

                tokio::time::sleep(delay).await;
                last_error = Some(e);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| PilotError::Internal("Retry loop exhausted without error".to_string())))
}

// ============================================================================
// User-friendly error formatting for CLI
// ============================================================================

/// Format an error for CLI display with suggestions.
pub struct CliErrorDisplay<'a> {
    error: &'a PilotError,
    show_suggestion: bool,
}

impl<'a> CliErrorDisplay<'a> {
    pub fn new(error: &'a PilotError) -> Self {
        Self {
            error,
            show_suggestion: true,
        }
    }

    pub fn without_suggestion(mut self) -> Self {
        self.show_suggestion = false;
        self
    }
}

impl<'a> fmt::Display for CliErrorDisplay<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.error)?;

        if self.show_suggestion {
            if let Some(suggestion) = self.error.user_suggestion() {
                writeln!(f)?;
                writeln!(f, "  Suggestion: {}", suggestion)?;
            }
        }

        if self.error.is_transient() {
            writeln!(f)?;
            writeln!(f, "  This error may be temporary. Try again.")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_error_display() {
        let err = PilotError::ToolNotFound("write_file".to_string());
        assert!(err.to_string().contains("E1001"));
        assert!(err.to_string().contains("write_file"));

        let err = PilotError::InvalidStepTransition {
            step: "step-1".to_string(),
            from: "completed".to_string(),
            to: "pending".to_string(),
        };
        assert!(err.to_string().contains("E4002"));
        assert!(err.to_string().contains("completed"));
    }

    #[test]
    fn test_error_categorization() {
        let err = PilotError::InvalidArguments {
            tool: "t".to_string(),
            message: "missing field".to_string(),
        };
        assert!(err.is_tool_error());
        assert!(!err.is_plan_error());

        assert!(PilotError::ExecutionTimeout(100).is_execution_error());
        assert!(PilotError::ExecutionTimeout(100).is_timeout());
        assert!(PilotError::RunTimeout(5).is_timeout());
        assert!(PilotError::StepNotFound("x".to_string()).is_plan_error());
        assert!(PilotError::Config("x".to_string()).is_config_error());
    }

    #[test]
    fn test_is_transient() {
        assert!(PilotError::IoError("disk".to_string()).is_transient());
        assert!(PilotError::CheckpointFailed("disk".to_string()).is_transient());
        assert!(!PilotError::ValidationError("bad".to_string()).is_transient());
        assert!(!PilotError::StepNotFound("x".to_string()).is_transient());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(PilotError::ToolNotFound("x".into()).error_code(), "E1001");
        assert_eq!(PilotError::Config("x".into()).error_code(), "E2003");
        assert_eq!(PilotError::ExecutionFailed("x".into()).error_code(), "E3001");
        assert_eq!(PilotError::StepNotFound("x".into()).error_code(), "E4001");
        assert_eq!(PilotError::RunTimeout(1).error_code(), "E5003");
        assert_eq!(PilotError::DuplicateTask("x".into()).error_code(), "E6002");
        assert_eq!(
            PilotError::CheckpointNotFound("x".into()).error_code(),
            "E7001"
        );
        assert_eq!(PilotError::Internal("x".into()).error_code(), "E9001");
    }

    #[test]
    fn test_retry_delay_calculation() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: false,
        };

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn test_retry_delay_is_capped() {
        let config = RetryConfig::for_task(1000, 10);
        assert_eq!(config.delay_for_attempt(20), Duration::from_secs(30));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PilotError = io_err.into();
        assert!(matches!(err, PilotError::IoError(_)));
    }

    #[test]
    fn test_cli_error_display() {
        let err = PilotError::ToolNotFound("nope".to_string());
        let output = CliErrorDisplay::new(&err).to_string();
        assert!(output.contains("nope"));
        assert!(output.contains("Suggestion"));

        let output = CliErrorDisplay::new(&err).without_suggestion().to_string();
        assert!(!output.contains("Suggestion"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_async_retries_transient_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_async_with_config(
            || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(PilotError::IoError("busy".to_string()))
                    } else {
                        Ok(7)
                    }
                }
            },
            RetryConfig::for_checkpoint(),
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_async_stops_on_permanent_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: PilotResult<()> = retry_async_with_config(
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(PilotError::ValidationError("bad".to_string()))
                }
            },
            RetryConfig::default(),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
