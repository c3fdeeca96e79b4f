use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "cellpilot")]
#[command(version, about = "Conversation compaction tooling for the spreadsheet agent")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Context limit for compaction (e.g., "80%" or "120000" tokens). Overrides cellpilot.toml.
    #[arg(long, global = true)]
    pub context_limit: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show token usage and the compaction plan for a conversation file
    Status {
        /// Conversation JSON (message array or transcript export)
        file: PathBuf,
    },
    /// Print the summarization prompt a compaction would send
    Prompt {
        file: PathBuf,
        /// Extra instruction appended to the prompt
        #[arg(long)]
        focus: Option<String>,
        /// Use the overflow-retry limits and keep budget
        #[arg(long)]
        aggressive: bool,
    },
    /// Rewrite a conversation with a supplied summary
    Apply {
        file: PathBuf,
        /// Markdown file holding the summary
        #[arg(long)]
        summary: PathBuf,
        /// Write the result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Export a conversation as a dated JSON transcript
    Export {
        file: PathBuf,
        /// Directory for the export (defaults to the project directory)
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Inline archived messages in place of their archive
        #[arg(long)]
        expand_archives: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    Show,
    Validate,
    Init,
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let default = if verbose { "cellpilot=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Status { file } => cmd::cmd_status(&project_dir, &cli, file)?,
        Commands::Prompt {
            file,
            focus,
            aggressive,
        } => cmd::cmd_prompt(&project_dir, &cli, file, focus.as_deref(), *aggressive)?,
        Commands::Apply {
            file,
            summary,
            output,
        } => cmd::cmd_apply(&project_dir, &cli, file, summary, output.as_deref())?,
        Commands::Export {
            file,
            output_dir,
            expand_archives,
        } => cmd::cmd_export(
            &project_dir,
            &cli,
            file,
            output_dir.as_deref(),
            *expand_archives,
        )?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, &cli, command.clone())?,
    }

    Ok(())
}
