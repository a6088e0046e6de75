use colored::Colorize;
use comfy_table::{Cell, Color};
use taskpilot_core::{Orchestrator, PilotConfig};

use crate::output::new_table;

pub async fn handle_tools_command(format: &str, config: PilotConfig) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::builder(config).build().await?;
    let tools = orchestrator.tools().list_tools().await;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&tools)?);
        return Ok(());
    }

    println!();
    println!("{}", "Registered Tools".bold().cyan());
    println!("{}", "═".repeat(50).dimmed());
    println!();

    let mut table = new_table(&["Name", "Parameters", "Description"]);
    for tool in &tools {
        let params = tool
            .parameters
            .iter()
            .map(|p| {
                let marker = if p.required { "" } else { "?" };
                format!("{}{}: {}", p.name, marker, p.kind)
            })
            .collect::<Vec<_>>()
            .join(", ");

        table.add_row(vec![
            Cell::new(&tool.name).fg(Color::Cyan),
            Cell::new(params),
            Cell::new(&tool.description),
        ]);
    }
    println!("{table}");
    println!();
    println!("{} {}", "Total:".bold(), tools.len());

    Ok(())
}
