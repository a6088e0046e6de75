pub mod checkpoints;
pub mod config;
pub mod exec;
pub mod pipeline;
pub mod run;
pub mod tools;

pub use checkpoints::{handle_checkpoints_command, CheckpointsCommand};
pub use config::handle_config_command;
pub use exec::{handle_exec_command, ExecArgs};
pub use pipeline::{handle_pipeline_command, PipelineArgs};
pub use run::{handle_run_command, RunArgs};
pub use tools::handle_tools_command;
