//! Transcript export: `cellpilot export`.

use std::path::Path;

use anyhow::Result;
use cellpilot::export::{TranscriptExport, load_conversation};

use super::super::Cli;
use super::load_config;

pub fn cmd_export(
    project_dir: &Path,
    cli: &Cli,
    file: &Path,
    output_dir: Option<&Path>,
    expand_archives: bool,
) -> Result<()> {
    let config = load_config(project_dir, cli)?;
    let (existing, messages) = load_conversation(file)?;

    let session_id = existing
        .as_ref()
        .map(|export| export.session_id.clone())
        .or_else(|| file.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "session".to_string());
    let model = existing
        .and_then(|export| export.model)
        .or_else(|| Some(config.model_info()));

    let mut export = TranscriptExport::new(session_id, model, messages);
    if expand_archives {
        export = export.expand_archives();
    }

    let dir = output_dir.unwrap_or(config.project_dir.as_path());
    let path = export.write_to_dir(dir)?;
    println!(
        "Exported {} messages to {}",
        export.messages.len(),
        path.display()
    );
    Ok(())
}
