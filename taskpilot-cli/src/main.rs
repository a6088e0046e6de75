use clap::{Parser, Subcommand};
use colored::Colorize;
use std::process::ExitCode;
use taskpilot_core::{init_tracing, CliErrorDisplay, PilotConfig, PilotError};

mod commands;
mod output;

use commands::{
    handle_checkpoints_command, handle_config_command, handle_exec_command,
    handle_pipeline_command, handle_run_command, handle_tools_command, CheckpointsCommand,
    ExecArgs, PipelineArgs, RunArgs,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "taskpilot")]
#[command(version = VERSION)]
#[command(about = "Taskpilot - autonomous task execution with sandboxed steps")]
#[command(long_about = r#"
Taskpilot turns a goal into a plan of steps, generates a small script for
each step and runs it in a sandbox that can only reach registered tools.
Larger goals can be decomposed into a task graph and executed with
dependency-aware parallelism.

Use 'taskpilot run <goal>' for a single agent loop and
'taskpilot pipeline <goal>' to schedule a task graph.
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Plan and execute a goal with a single agent loop")]
    Run(RunArgs),

    #[command(about = "Decompose a goal (or load a task graph) and run it in parallel")]
    Pipeline(PipelineArgs),

    #[command(about = "Run a script in the sandbox with the built-in tools")]
    Exec(ExecArgs),

    #[command(about = "List registered tools")]
    Tools {
        #[arg(
            short,
            long,
            default_value = "text",
            help = "Output format (text, json)"
        )]
        format: String,
    },

    #[command(about = "Print the effective configuration")]
    Config {
        #[arg(
            short,
            long,
            default_value = "toml",
            help = "Output format (toml, json)"
        )]
        format: String,
    },

    #[command(about = "Inspect stored checkpoints")]
    Checkpoints {
        #[command(subcommand)]
        action: Option<CheckpointsCommand>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match PilotConfig::load() {
        Ok(config) => config,
        Err(e) => {
            let error = PilotError::from(e);
            eprint!("{}: {}", "Error".red().bold(), CliErrorDisplay::new(&error));
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&config.logging, cli.verbose);

    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<PilotError>() {
                Some(error) => eprint!("{}: {}", "Error".red().bold(), CliErrorDisplay::new(error)),
                None => eprintln!("{}: {}", "Error".red().bold(), e),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, config: PilotConfig) -> anyhow::Result<()> {
    tracing::debug!(checkpoints = config.checkpoints.enabled, "Dispatching command");
    match command {
        Commands::Run(args) => handle_run_command(args, config).await,
        Commands::Pipeline(args) => handle_pipeline_command(args, config).await,
        Commands::Exec(args) => handle_exec_command(args, config).await,
        Commands::Tools { format } => handle_tools_command(&format, config).await,
        Commands::Config { format } => handle_config_command(&format, &config),
        Commands::Checkpoints { action } => handle_checkpoints_command(action, config).await,
    }
}
