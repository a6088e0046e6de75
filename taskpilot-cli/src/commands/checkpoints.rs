use clap::Subcommand;
use colored::Colorize;
use comfy_table::{Cell, Color};
use taskpilot_core::{Orchestrator, PilotConfig};

use crate::output::{new_table, plan_table, print_event};

#[derive(Subcommand)]
pub enum CheckpointsCommand {
    #[command(about = "List stored checkpoints, newest first")]
    List {
        #[arg(
            short,
            long,
            default_value = "text",
            help = "Output format (text, json)"
        )]
        format: String,
    },

    #[command(about = "Show the plan stored in a checkpoint")]
    Show {
        #[arg(help = "Checkpoint id")]
        id: String,

        #[arg(
            short,
            long,
            default_value = "text",
            help = "Output format (text, json)"
        )]
        format: String,
    },

    #[command(about = "Continue the plan stored in a checkpoint")]
    Resume {
        #[arg(help = "Checkpoint id")]
        id: String,

        #[arg(short, long, default_value = "default", help = "Project the run works in")]
        project: String,
    },
}

pub async fn handle_checkpoints_command(
    cmd: Option<CheckpointsCommand>,
    config: PilotConfig,
) -> anyhow::Result<()> {
    if !config.checkpoints.enabled {
        anyhow::bail!("Checkpoints are disabled (checkpoints.enabled = false)");
    }
    let orchestrator = Orchestrator::builder(config).build().await?;

    match cmd.unwrap_or(CheckpointsCommand::List {
        format: "text".to_string(),
    }) {
        CheckpointsCommand::List { format } => cmd_checkpoints_list(&orchestrator, &format).await,
        CheckpointsCommand::Show { id, format } => {
            cmd_checkpoints_show(&orchestrator, &id, &format).await
        }
        CheckpointsCommand::Resume { id, project } => {
            cmd_checkpoints_resume(&orchestrator, &id, &project).await
        }
    }
}

async fn cmd_checkpoints_list(orchestrator: &Orchestrator, format: &str) -> anyhow::Result<()> {
    let Some(store) = orchestrator.checkpoints() else {
        anyhow::bail!("No checkpoint store configured");
    };
    let mut checkpoints = store.list_checkpoints().await?;
    checkpoints.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&checkpoints)?);
        return Ok(());
    }

    if checkpoints.is_empty() {
        println!("{}", "No checkpoints stored.".yellow());
        return Ok(());
    }

    let mut table = new_table(&["Id", "Created", "Progress", "Goal"]);
    for info in &checkpoints {
        let progress_color = if info.completed_steps == info.total_steps {
            Color::Green
        } else {
            Color::Yellow
        };
        table.add_row(vec![
            Cell::new(&info.id).fg(Color::Cyan),
            Cell::new(info.created_at.format("%Y-%m-%d %H:%M:%S").to_string()),
            Cell::new(format!("{}/{}", info.completed_steps, info.total_steps))
                .fg(progress_color),
            Cell::new(&info.goal),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn cmd_checkpoints_show(
    orchestrator: &Orchestrator,
    id: &str,
    format: &str,
) -> anyhow::Result<()> {
    let Some(store) = orchestrator.checkpoints() else {
        anyhow::bail!("No checkpoint store configured");
    };
    let plan = store.load_checkpoint(id).await?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("{} {}", "Plan:".bold(), plan.id);
    println!("{} {}", "Goal:".bold(), plan.goal);
    println!("{}", plan_table(&plan));
    Ok(())
}

async fn cmd_checkpoints_resume(
    orchestrator: &Orchestrator,
    id: &str,
    project: &str,
) -> anyhow::Result<()> {
    orchestrator.events().subscribe_fn(print_event);
    let result = orchestrator.resume_agent(project, id).await?;

    if let Some(plan) = &result.plan {
        println!("{}", plan_table(plan));
    }
    if !result.success {
        anyhow::bail!("run stopped ({}): {}", result.stop_reason, result.reason);
    }
    println!("{} {}", "Completed:".green().bold(), result.reason);
    Ok(())
}
