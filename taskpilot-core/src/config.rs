use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::error::PilotError;

/// Upper bounds for the duration settings, in their configured units.
const MAX_RUN_TIMEOUT_MINUTES: u64 = 7 * 24 * 60;
const MAX_DURATION_MS: u64 = 24 * 60 * 60 * 1000;

/// `start + budget`, pinned to a far-off instant when the sum overflows.
pub(crate) fn deadline_after(start: Instant, budget: Duration) -> Instant {
    start
        .checked_add(budget)
        .or_else(|| start.checked_add(Duration::from_secs(MAX_RUN_TIMEOUT_MINUTES * 60)))
        .unwrap_or(start)
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ConfigLoadError> for PilotError {
    fn from(err: ConfigLoadError) -> Self {
        match err {
            ConfigLoadError::Config(e) => e.into(),
            ConfigLoadError::InvalidValue { key, message } => {
                PilotError::InvalidConfigValue { key, message }
            }
            ConfigLoadError::Io(e) => e.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PilotConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub checkpoints: CheckpointConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Budgets for a single agent loop run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u64,

    /// Size of the trailing window of attempted step descriptions.
    #[serde(default = "default_stuck_threshold")]
    pub stuck_threshold: usize,

    #[serde(default)]
    pub require_approval: bool,

    #[serde(default = "default_ask_human_timeout")]
    pub ask_human_timeout_ms: u64,

    #[serde(default = "default_execution_timeout")]
    pub execution_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_max_parallel_agents")]
    pub max_parallel_agents: usize,

    #[serde(default = "default_max_task_retries")]
    pub max_task_retries: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_sandbox_timeout")]
    pub default_timeout_ms: u64,

    /// Hard cap applied to every requested timeout.
    #[serde(default = "default_max_timeout")]
    pub max_timeout_ms: u64,

    #[serde(default = "default_max_log_lines")]
    pub max_log_lines: usize,

    #[serde(default = "default_max_log_line_chars")]
    pub max_log_line_chars: usize,

    #[serde(default)]
    pub max_operations: Option<u64>,

    #[serde(default = "default_max_call_levels")]
    pub max_call_levels: usize,

    #[serde(default = "default_max_string_size")]
    pub max_string_size: usize,

    #[serde(default = "default_max_collection_size")]
    pub max_array_size: usize,

    #[serde(default = "default_max_collection_size")]
    pub max_map_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json_format: bool,
}

fn default_max_iterations() -> u32 {
    50
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout_minutes() -> u64 {
    30
}

fn default_stuck_threshold() -> usize {
    3
}

fn default_ask_human_timeout() -> u64 {
    300_000
}

fn default_execution_timeout() -> u64 {
    30_000
}

fn default_max_parallel_agents() -> usize {
    2
}

fn default_max_task_retries() -> u32 {
    2
}

fn default_retry_delay() -> u64 {
    500
}

fn default_sandbox_timeout() -> u64 {
    30_000
}

fn default_max_timeout() -> u64 {
    120_000
}

fn default_max_log_lines() -> usize {
    500
}

fn default_max_log_line_chars() -> usize {
    2000
}

fn default_max_call_levels() -> usize {
    64
}

fn default_max_string_size() -> usize {
    1024 * 1024
}

fn default_max_collection_size() -> usize {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_retries: default_max_retries(),
            timeout_minutes: default_timeout_minutes(),
            stuck_threshold: default_stuck_threshold(),
            require_approval: false,
            ask_human_timeout_ms: default_ask_human_timeout(),
            execution_timeout_ms: default_execution_timeout(),
        }
    }
}

impl AgentConfig {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes.saturating_mul(60))
    }

    pub fn ask_human_timeout(&self) -> Duration {
        Duration::from_millis(self.ask_human_timeout_ms)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_parallel_agents: default_max_parallel_agents(),
            max_task_retries: default_max_task_retries(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_sandbox_timeout(),
            max_timeout_ms: default_max_timeout(),
            max_log_lines: default_max_log_lines(),
            max_log_line_chars: default_max_log_line_chars(),
            max_operations: None,
            max_call_levels: default_max_call_levels(),
            max_string_size: default_max_string_size(),
            max_array_size: default_max_collection_size(),
            max_map_size: default_max_collection_size(),
        }
    }
}

impl SandboxConfig {
    /// Clamp a requested timeout to the hard cap; `None` selects the default.
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        let cap = Duration::from_millis(self.max_timeout_ms);
        requested
            .unwrap_or_else(|| Duration::from_millis(self.default_timeout_ms))
            .min(cap)
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
        }
    }
}

impl CheckpointConfig {
    pub fn resolved_directory(&self) -> Option<PathBuf> {
        self.directory
            .clone()
            .or_else(|| get_data_dir().map(|d| d.join("checkpoints")))
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl PilotConfig {
    pub fn load() -> Result<Self, ConfigLoadError> {
        Self::load_from_paths(get_config_paths())
    }

    pub fn load_from_paths(paths: Vec<PathBuf>) -> Result<Self, ConfigLoadError> {
        load_dotenv_files();

        let mut builder = ConfigBuilder::builder();

        for path in paths {
            if path.exists() {
                builder = builder.add_source(File::from(path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("TASKPILOT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;

        let mut pilot_config: PilotConfig = config.try_deserialize()?;

        if let Ok(level) = std::env::var("TASKPILOT_LOG_LEVEL") {
            pilot_config.logging.level = level;
        } else if let Ok(level) = std::env::var("RUST_LOG") {
            pilot_config.logging.level = level;
        }

        pilot_config.validate()?;

        Ok(pilot_config)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        let positive: [(&str, u64); 8] = [
            ("agent.max_iterations", self.agent.max_iterations as u64),
            ("agent.timeout_minutes", self.agent.timeout_minutes),
            ("agent.stuck_threshold", self.agent.stuck_threshold as u64),
            ("agent.execution_timeout_ms", self.agent.execution_timeout_ms),
            ("pipeline.max_parallel_agents", self.pipeline.max_parallel_agents as u64),
            ("sandbox.default_timeout_ms", self.sandbox.default_timeout_ms),
            ("sandbox.max_timeout_ms", self.sandbox.max_timeout_ms),
            ("sandbox.max_log_lines", self.sandbox.max_log_lines as u64),
        ];

        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigLoadError::InvalidValue {
                    key: key.to_string(),
                    message: "Must be greater than 0".to_string(),
                });
            }
        }

        let bounded: [(&str, u64, u64); 5] = [
            ("agent.timeout_minutes", self.agent.timeout_minutes, MAX_RUN_TIMEOUT_MINUTES),
            ("agent.ask_human_timeout_ms", self.agent.ask_human_timeout_ms, MAX_DURATION_MS),
            ("agent.execution_timeout_ms", self.agent.execution_timeout_ms, MAX_DURATION_MS),
            ("pipeline.retry_delay_ms", self.pipeline.retry_delay_ms, MAX_DURATION_MS),
            ("sandbox.max_timeout_ms", self.sandbox.max_timeout_ms, MAX_DURATION_MS),
        ];

        for (key, value, max) in bounded {
            if value > max {
                return Err(ConfigLoadError::InvalidValue {
                    key: key.to_string(),
                    message: format!("Must not exceed {}", max),
                });
            }
        }

        if self.sandbox.default_timeout_ms > self.sandbox.max_timeout_ms {
            return Err(ConfigLoadError::InvalidValue {
                key: "sandbox.default_timeout_ms".to_string(),
                message: format!(
                    "Cannot exceed sandbox.max_timeout_ms ({})",
                    self.sandbox.max_timeout_ms
                ),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        let level_lower = self.logging.level.to_lowercase();
        if !valid_levels.contains(&level_lower.as_str()) && !level_lower.contains('=') {
            return Err(ConfigLoadError::InvalidValue {
                key: "logging.level".to_string(),
                message: format!(
                    "Invalid log level '{}'. Must be one of: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        Ok(())
    }

    pub fn log_level(&self) -> &str {
        &self.logging.level
    }
}

fn get_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join("config").join("default.toml"));
        paths.push(cwd.join("config").join("local.toml"));
        paths.push(cwd.join("taskpilot.toml"));
    }

    if let Some(config_dir) = get_config_dir() {
        paths.push(config_dir.join("config.toml"));
    }

    paths
}

fn load_dotenv_files() {
    let mut env_paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        env_paths.push(cwd.join(".env"));
        env_paths.push(cwd.join(".env.local"));
    }

    if let Some(config_dir) = get_config_dir() {
        env_paths.push(config_dir.join(".env"));
    }

    for path in env_paths {
        if path.exists() {
            let _ = dotenvy::from_path(&path);
        }
    }
}

pub fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("taskpilot"))
}

pub fn get_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("taskpilot"))
}

pub fn ensure_data_dir() -> Result<PathBuf, std::io::Error> {
    let data_dir = get_data_dir().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Could not determine data directory",
        )
    })?;

    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)?;
    }

    Ok(data_dir)
}
