use clap::Args;
use colored::Colorize;
use std::sync::Arc;
use std::time::Duration;
use taskpilot_core::{
    AgentLoop, AgentRunResult, EventKind, Orchestrator, PilotConfig, PilotError,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::output::{plan_table, print_event};

#[derive(Args)]
pub struct RunArgs {
    #[arg(help = "Goal to plan and execute")]
    pub goal: String,

    #[arg(short, long, default_value = "default", help = "Project the run works in")]
    pub project: String,

    #[arg(long, help = "Ask for approval before executing the plan")]
    pub require_approval: bool,

    #[arg(long, help = "Override the iteration budget")]
    pub max_iterations: Option<u32>,

    #[arg(long, help = "Override the step retry budget")]
    pub max_retries: Option<u32>,

    #[arg(
        short,
        long,
        default_value = "text",
        help = "Output format (text, json)"
    )]
    pub format: String,
}

/// Something the loop is waiting on a person for.
enum Prompt {
    Approval,
    Question(String),
}

pub async fn handle_run_command(args: RunArgs, mut config: PilotConfig) -> anyhow::Result<()> {
    config.agent.require_approval |= args.require_approval;
    if let Some(max_iterations) = args.max_iterations {
        config.agent.max_iterations = max_iterations;
    }
    if let Some(max_retries) = args.max_retries {
        config.agent.max_retries = max_retries;
    }
    config.validate().map_err(PilotError::from)?;

    let orchestrator = Arc::new(Orchestrator::builder(config).build().await?);
    let json = args.format == "json";

    let (prompt_tx, mut prompts) = mpsc::unbounded_channel();
    orchestrator.events().subscribe_fn(move |event| {
        if !json {
            print_event(event);
        }
        let prompt = match event.kind {
            EventKind::ApprovalRequired => Prompt::Approval,
            EventKind::AskHuman => Prompt::Question(event.message.clone()),
            _ => return,
        };
        let _ = prompt_tx.send(prompt);
    });

    let agent = orchestrator.start_agent(&args.project).await;
    if !json {
        println!(
            "{} {} {}",
            "Running".cyan().bold(),
            agent.run_id().dimmed(),
            args.goal
        );
    }

    let mut handle = {
        let orchestrator = orchestrator.clone();
        let agent = agent.clone();
        let project = args.project.clone();
        let goal = args.goal.clone();
        tokio::spawn(async move { orchestrator.run_agent_loop(&project, agent, &goal).await })
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let result = loop {
        tokio::select! {
            joined = &mut handle => break joined?,
            Some(prompt) = prompts.recv() => {
                ask(&prompt);
                tokio::select! {
                    line = lines.next_line() => {
                        settle(&agent, &prompt).await;
                        respond(&agent, prompt, line?);
                    }
                    joined = &mut handle => break joined?,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("{}", "Interrupted, stopping the run".yellow());
                agent.abort("interrupted");
            }
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    if !result.success {
        anyhow::bail!("run stopped ({}): {}", result.stop_reason, result.reason);
    }
    Ok(())
}

fn ask(prompt: &Prompt) {
    match prompt {
        Prompt::Approval => eprint!(
            "{} [{}]es / feedback to replan / [{}]uit: ",
            "Approve the plan?".bold(),
            "y".green(),
            "q".red()
        ),
        Prompt::Question(question) => eprint!("{} ", question.bold()),
    }
}

/// Prompt events fire just before the loop registers its wait.
async fn settle(agent: &AgentLoop, prompt: &Prompt) {
    for _ in 0..100 {
        let pending = match prompt {
            Prompt::Approval => agent.human().has_pending_approval(),
            Prompt::Question(_) => agent.human().pending_question().is_some(),
        };
        if pending || agent.is_finished() || agent.is_aborted() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn respond(agent: &AgentLoop, prompt: Prompt, line: Option<String>) {
    let outcome = match (prompt, line) {
        (_, None) => {
            agent.abort("input closed");
            Ok(())
        }
        (Prompt::Approval, Some(line)) => match line.trim() {
            "" | "y" | "yes" => agent.approve(),
            "q" | "quit" => {
                agent.abort("rejected by user");
                Ok(())
            }
            feedback => agent.reject(feedback),
        },
        (Prompt::Question(_), Some(line)) => agent.answer(line.trim()),
    };

    if let Err(e) = outcome {
        eprintln!("{} {}", "Warning:".yellow(), e);
    }
}

fn print_result(result: &AgentRunResult) {
    println!();
    if let Some(plan) = &result.plan {
        println!("{}", plan_table(plan));
    }

    if !result.artifacts.is_empty() {
        println!("{} {}", "Artifacts:".bold(), result.artifacts.join(", "));
    }

    let status = if result.success {
        "Completed".green().bold()
    } else {
        "Stopped".red().bold()
    };
    println!(
        "{} after {} iteration(s), {} retr{}, {}ms: {}",
        status,
        result.iterations,
        result.retries,
        if result.retries == 1 { "y" } else { "ies" },
        result.duration_ms,
        result.reason
    );
}
