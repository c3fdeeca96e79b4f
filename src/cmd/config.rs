//! Configuration view and validation commands: `cellpilot config`.

use anyhow::Result;

use super::super::{Cli, ConfigCommands};
use super::load_config;

pub fn cmd_config(
    project_dir: &std::path::Path,
    cli: &Cli,
    command: Option<ConfigCommands>,
) -> Result<()> {
    use cellpilot::config::{CONFIG_DIR, CONFIG_FILE, CellpilotToml};

    let config_dir = project_dir.join(CONFIG_DIR);
    let config_path = config_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Cellpilot Configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No cellpilot.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();

            let config = load_config(project_dir, cli)?;
            let toml = &config.toml;

            println!("[model]");
            println!("  provider = \"{}\"", toml.model.provider);
            println!("  id = \"{}\"", toml.model.id);
            println!("  context_window = {}", toml.model.context_window);
            println!("  max_tokens = {}", toml.model.max_tokens);
            println!();

            println!("[compaction]");
            println!("  reserve_tokens = {}", toml.compaction.reserve_tokens);
            println!("  keep_recent_tokens = {}", toml.compaction.keep_recent_tokens);
            println!("  min_messages = {}", toml.compaction.min_messages);
            println!("  context_limit = \"{}\"", toml.compaction.context_limit);
            println!("  auto_compact = {}", toml.compaction.auto_compact);
            println!();

            if let Ok(settings) = config.compaction_settings() {
                println!("Effective limits (with env/CLI overrides):");
                println!(
                    "  default: user {} / assistant {} / tool result {} chars",
                    settings.limits.max_user_chars,
                    settings.limits.max_assistant_chars,
                    settings.limits.max_tool_result_chars
                );
                println!(
                    "  aggressive: user {} / assistant {} / tool result {} chars",
                    settings.aggressive_limits.max_user_chars,
                    settings.aggressive_limits.max_assistant_chars,
                    settings.aggressive_limits.max_tool_result_chars
                );
                println!();
            }

            println!("[coordinator]");
            match toml.coordinator.max_queue_depth {
                Some(depth) => println!("  max_queue_depth = {}", depth),
                None => println!("  max_queue_depth = unbounded"),
            }
            println!();

            if !config_path.exists() {
                println!("Run 'cellpilot config init' to create a cellpilot.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No cellpilot.toml found. Using defaults (valid).");
                return Ok(());
            }

            let config = load_config(project_dir, cli)?;
            let warnings = config.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("cellpilot.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !config_dir.exists() {
                std::fs::create_dir_all(&config_dir)?;
            }

            let toml = CellpilotToml::default();
            toml.save(&config_path)?;

            println!("Created cellpilot.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [model] provider, id, context_window, max_tokens");
            println!("  - [compaction] reserve_tokens, keep_recent_tokens, context_limit");
            println!("  - [coordinator] max_queue_depth");
            println!();
        }
    }

    Ok(())
}
