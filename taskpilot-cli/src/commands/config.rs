use colored::Colorize;
use taskpilot_core::{get_config_dir, PilotConfig};

pub fn handle_config_command(format: &str, config: &PilotConfig) -> anyhow::Result<()> {
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }

    if let Some(dir) = get_config_dir() {
        println!(
            "{} {}",
            "# Config directory:".dimmed(),
            dir.join("config.toml").display().to_string().dimmed()
        );
    }
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
