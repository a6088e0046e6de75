use anyhow::Context;
use clap::Args;
use colored::Colorize;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use taskpilot_core::{Orchestrator, PilotConfig, PilotError, PipelineResult, Task};

use crate::output::{print_event, task_table};

#[derive(Args)]
pub struct PipelineArgs {
    #[arg(help = "Goal to decompose into tasks", required_unless_present = "graph")]
    pub goal: Option<String>,

    #[arg(
        short,
        long,
        conflicts_with = "goal",
        help = "Run a task graph from a YAML or JSON file instead of decomposing a goal"
    )]
    pub graph: Option<PathBuf>,

    #[arg(long, help = "Maximum number of tasks running at once")]
    pub parallel: Option<usize>,

    #[arg(long, help = "Override the per-task retry budget")]
    pub task_retries: Option<u32>,

    #[arg(short, long, default_value = "default", help = "Project the tasks work in")]
    pub project: String,

    #[arg(
        short,
        long,
        default_value = "text",
        help = "Output format (text, json)"
    )]
    pub format: String,
}

/// Accepts both `tasks: [...]` and a bare list.
#[derive(Deserialize)]
#[serde(untagged)]
enum GraphFile {
    Wrapped { tasks: Vec<Task> },
    Bare(Vec<Task>),
}

impl GraphFile {
    fn into_tasks(self) -> Vec<Task> {
        match self {
            GraphFile::Wrapped { tasks } | GraphFile::Bare(tasks) => tasks,
        }
    }
}

pub fn load_task_graph(path: &Path) -> anyhow::Result<Vec<Task>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read task graph {}", path.display()))?;

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let graph: GraphFile = if is_json {
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid task graph {}", path.display()))?
    } else {
        serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid task graph {}", path.display()))?
    };
    Ok(graph.into_tasks())
}

pub async fn handle_pipeline_command(
    args: PipelineArgs,
    mut config: PilotConfig,
) -> anyhow::Result<()> {
    if let Some(parallel) = args.parallel {
        config.pipeline.max_parallel_agents = parallel;
    }
    if let Some(retries) = args.task_retries {
        config.pipeline.max_task_retries = retries;
    }
    config.validate().map_err(PilotError::from)?;

    let json = args.format == "json";
    let orchestrator = Orchestrator::builder(config).build().await?;
    if !json {
        orchestrator.events().subscribe_fn(print_event);
    }

    let result = match (&args.graph, &args.goal) {
        (Some(path), _) => {
            let tasks = load_task_graph(path)?;
            if !json {
                println!(
                    "{} {} task(s) from {}",
                    "Scheduling".cyan().bold(),
                    tasks.len(),
                    path.display()
                );
            }
            orchestrator.run_pipeline_graph(&args.project, tasks).await?
        }
        (None, Some(goal)) => {
            if !json {
                println!("{} {}", "Decomposing".cyan().bold(), goal);
            }
            orchestrator.run_pipeline(&args.project, goal).await?
        }
        (None, None) => anyhow::bail!("Provide a goal or --graph"),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    if !result.success {
        anyhow::bail!("pipeline {} did not succeed: {}", result.run_id, result.reason);
    }
    Ok(())
}

fn print_result(result: &PipelineResult) {
    println!();
    println!("{}", task_table(&result.tasks));
    println!(
        "{} {} | {} {} | {} {} | {} / {} | {}ms",
        "Completed:".bold(),
        result.completed.to_string().green(),
        "Failed:".bold(),
        result.failed.to_string().red(),
        "Blocked:".bold(),
        result.blocked.to_string().yellow(),
        result.strategy,
        result.complexity,
        result.duration_ms
    );
    println!("{}", result.reason);
}
