use anyhow::Context;
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;
use taskpilot_core::{Orchestrator, PilotConfig, ToolBindings};

#[derive(Args)]
pub struct ExecArgs {
    #[arg(help = "Script file to run", required_unless_present = "code")]
    pub script: Option<PathBuf>,

    #[arg(short = 'e', long, conflicts_with = "script", help = "Inline script source")]
    pub code: Option<String>,

    #[arg(short, long, default_value = "default", help = "Project bound to file tools")]
    pub project: String,

    #[arg(long, help = "Timeout in milliseconds (capped by sandbox.max_timeout_ms)")]
    pub timeout_ms: Option<u64>,

    #[arg(
        short,
        long,
        default_value = "text",
        help = "Output format (text, json)"
    )]
    pub format: String,
}

pub async fn handle_exec_command(args: ExecArgs, config: PilotConfig) -> anyhow::Result<()> {
    let code = match (&args.code, &args.script) {
        (Some(code), _) => code.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script {}", path.display()))?,
        (None, None) => anyhow::bail!("Provide a script file or --code"),
    };

    let orchestrator = Orchestrator::builder(config).build().await?;
    let bindings = ToolBindings::all().with_scope("project", args.project.as_str());
    let result = orchestrator
        .sandbox()
        .execute(&code, &bindings, args.timeout_ms.map(Duration::from_millis))
        .await;

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        if !result.output.is_empty() {
            println!("{}", result.output);
        }
        if !result.tools_invoked.is_empty() {
            eprintln!("{} {}", "Tools:".dimmed(), result.tools_invoked.join(", "));
        }
        if !result.artifacts.is_empty() {
            eprintln!("{} {}", "Artifacts:".dimmed(), result.artifacts.join(", "));
        }
        eprintln!("{} {}ms", "Duration:".dimmed(), result.duration_ms);
    }

    if let Some(error) = &result.error {
        anyhow::bail!("script failed: {}", error);
    }
    Ok(())
}
