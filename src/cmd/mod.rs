//! CLI command implementations.
//!
//! | Module    | Commands handled               |
//! |-----------|--------------------------------|
//! | `compact` | `Status`, `Prompt`, `Apply`    |
//! | `config`  | `Config`                       |
//! | `export`  | `Export`                       |

pub mod compact;
pub mod config;
pub mod export;

pub use compact::{cmd_apply, cmd_prompt, cmd_status};
pub use config::cmd_config;
pub use export::cmd_export;

use anyhow::Result;
use cellpilot::config::CellpilotConfig;

use super::Cli;

/// Project configuration with environment and CLI overrides applied.
fn load_config(project_dir: &std::path::Path, cli: &Cli) -> Result<CellpilotConfig> {
    Ok(CellpilotConfig::new(project_dir.to_path_buf())?.with_cli_args(cli.context_limit.clone()))
}
