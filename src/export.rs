//! JSON transcript export.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cellpilot_common::{ConversationMessage, ModelInfo};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A downloadable copy of one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptExport {
    pub exported_at: DateTime<Utc>,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelInfo>,
    pub messages: Vec<ConversationMessage>,
}

impl TranscriptExport {
    pub fn new(
        session_id: impl Into<String>,
        model: Option<ModelInfo>,
        messages: Vec<ConversationMessage>,
    ) -> Self {
        Self {
            exported_at: Utc::now(),
            session_id: session_id.into(),
            model,
            messages,
        }
    }

    /// Replace archive messages with the messages they hold, so the export reads
    /// as the full original conversation.
    pub fn expand_archives(mut self) -> Self {
        self.messages = expand_archived(self.messages);
        self
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize transcript")
    }

    /// Write into `dir` under [`export_filename`]; returns the written path.
    pub fn write_to_dir(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create export directory: {}", dir.display()))?;
        let path = dir.join(export_filename(self.exported_at.date_naive()));
        std::fs::write(&path, self.to_json()?)
            .with_context(|| format!("Failed to write transcript: {}", path.display()))?;
        Ok(path)
    }
}

/// `cellpilot-transcript-YYYY-MM-DD.json`
pub fn export_filename(date: NaiveDate) -> String {
    format!("cellpilot-transcript-{}.json", date.format("%Y-%m-%d"))
}

fn expand_archived(messages: Vec<ConversationMessage>) -> Vec<ConversationMessage> {
    let mut out = Vec::with_capacity(messages.len());
    for message in messages {
        match message {
            ConversationMessage::ArchivedMessages(archive) => {
                out.extend(expand_archived(archive.messages));
            }
            other => out.push(other),
        }
    }
    out
}

/// Read a conversation file: either a bare message array or a transcript export.
pub fn load_conversation(path: &Path) -> Result<(Option<TranscriptExport>, Vec<ConversationMessage>)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read conversation file: {}", path.display()))?;
    parse_conversation(&content)
        .with_context(|| format!("Failed to parse conversation file: {}", path.display()))
}

pub fn parse_conversation(
    content: &str,
) -> Result<(Option<TranscriptExport>, Vec<ConversationMessage>)> {
    let value: serde_json::Value = serde_json::from_str(content).context("Invalid JSON")?;
    if value.is_array() {
        let messages = serde_json::from_value(value).context("Invalid message list")?;
        return Ok((None, messages));
    }
    let export: TranscriptExport =
        serde_json::from_value(value).context("Expected a message array or transcript export")?;
    let messages = export.messages.clone();
    Ok((Some(export), messages))
}
