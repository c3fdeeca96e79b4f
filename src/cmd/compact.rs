//! Offline compaction tooling: `cellpilot status | prompt | apply`.

use std::path::Path;

use anyhow::{Context, Result};
use cellpilot::compaction::{
    CompactionPlan, ContextUsage, SUMMARIZATION_SYSTEM_PROMPT, missing_sections,
    rewrite_conversation,
};
use cellpilot::errors::CompactionError;
use cellpilot::export::load_conversation;

use super::super::Cli;
use super::load_config;

pub fn cmd_status(project_dir: &Path, cli: &Cli, file: &Path) -> Result<()> {
    let config = load_config(project_dir, cli)?;
    let settings = config.compaction_settings()?;
    let model = config.model_info();
    let (_, messages) = load_conversation(file)?;

    let usage = ContextUsage::measure(&messages, &model, &settings);

    println!();
    println!("Conversation Compaction - {}", file.display());
    println!("================================");
    println!();
    println!("Model: {} ({} token window)", model.id, model.context_window);
    println!("Context limit: {}", usage.limit);
    println!();
    println!("Status:");
    println!("  Messages: {}", messages.len());
    println!("  Unsummarized chat messages: {}", usage.eligible_messages);
    println!("  Estimated tokens: {}", usage.used_tokens);
    println!("  Context limit: {} tokens", usage.effective_limit());
    println!("  Usage: {:.1}%", usage.usage_percentage());
    println!("  Remaining budget: {} tokens", usage.remaining_tokens());
    println!();

    let keep = settings.initial_keep_tokens(&model);
    match CompactionPlan::prepare(&messages, keep, settings.min_messages) {
        Ok(plan) => {
            println!("Plan:");
            println!("  Boundary: {}", plan.boundary_start);
            println!("  Cut index: {}", plan.cut_index);
            println!("  Keep budget: {} tokens", plan.keep_recent_tokens);
            println!("  Would summarize: {} chat messages", plan.summarized_count);
            println!("  Would keep: {} messages", plan.kept(&messages).len());
        }
        Err(err) if err.is_insufficient_input() => {
            println!("Plan: {}", err);
        }
        Err(err) => return Err(err.into()),
    }
    println!();

    if usage.should_compact() {
        println!("Status: Compaction RECOMMENDED (approaching limit)");
    } else {
        println!("Status: Compaction not needed");
    }
    println!();

    Ok(())
}

pub fn cmd_prompt(
    project_dir: &Path,
    cli: &Cli,
    file: &Path,
    focus: Option<&str>,
    aggressive: bool,
) -> Result<()> {
    let config = load_config(project_dir, cli)?;
    let settings = config.compaction_settings()?;
    let model = config.model_info();
    let (_, messages) = load_conversation(file)?;

    let mut keep = settings.initial_keep_tokens(&model);
    let mut limits = settings.limits;
    if aggressive {
        keep = settings.retry_keep_tokens(&model, keep);
        limits = settings.aggressive_limits;
    }

    let plan = CompactionPlan::prepare(&messages, keep, settings.min_messages)?;

    println!("=== System prompt ===");
    println!("{}", SUMMARIZATION_SYSTEM_PROMPT);
    println!();
    println!("=== User prompt ===");
    println!("{}", plan.prompt(&messages, &limits, focus));
    Ok(())
}

pub fn cmd_apply(
    project_dir: &Path,
    cli: &Cli,
    file: &Path,
    summary_path: &Path,
    output: Option<&Path>,
) -> Result<()> {
    let config = load_config(project_dir, cli)?;
    let settings = config.compaction_settings()?;
    let model = config.model_info();
    let (_, messages) = load_conversation(file)?;

    let summary = std::fs::read_to_string(summary_path)
        .with_context(|| format!("Failed to read summary: {}", summary_path.display()))?
        .trim()
        .to_string();
    if summary.is_empty() {
        return Err(CompactionError::EmptySummary.into());
    }
    for header in missing_sections(&summary) {
        eprintln!("warning: summary has no '{}' section", header);
    }

    let plan = CompactionPlan::prepare(
        &messages,
        settings.initial_keep_tokens(&model),
        settings.min_messages,
    )?;
    let result = plan.into_result(&messages, summary, settings.limits, false);
    let rewritten = rewrite_conversation(&messages, &result);
    let json = serde_json::to_string_pretty(&rewritten).context("Failed to serialize conversation")?;

    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write conversation: {}", path.display()))?;
            println!(
                "Compacted {} messages; kept {}. Wrote {}",
                result.summarized_count,
                result.kept_messages.len(),
                path.display()
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}
