//! Typed error hierarchy for cellpilot.
//!
//! Two top-level enums cover the two subsystems:
//! - `CoordinatorError`: workbook write queueing and mutation failures
//! - `CompactionError`: conversation compaction failures

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Errors from the workbook write coordinator.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The mutation closure returned an error. Only its own caller sees this.
    #[error("Workbook mutation failed: {0}")]
    MutationFailed(#[source] anyhow::Error),

    #[error("Workbook mutation panicked: {message}")]
    MutationPanicked { message: String },

    #[error("Workbook write was cancelled")]
    Cancelled,

    #[error("Write queue for workbook {workbook_id} is full ({depth} waiting)")]
    QueueFull { workbook_id: String, depth: usize },

    #[error("Write coordinator has been disposed")]
    Disposed,
}

/// Errors from a compaction pass.
#[derive(Debug, Error)]
pub enum CompactionError {
    #[error("Too few messages to compact: {found} chat messages, need at least {required}")]
    TooFewMessages { found: usize, required: usize },

    #[error("Nothing to compact: all recent messages fit in the kept budget")]
    NothingToCompact,

    #[error("No API key available for provider '{provider}'")]
    MissingApiKey { provider: String },

    #[error("Summarization failed: {message}")]
    Provider { message: String },

    #[error("Summarization was aborted")]
    Aborted,

    #[error("Summarization returned an empty summary")]
    EmptySummary,

    #[error("A compaction is already running for this session")]
    Busy,

    #[error("Conversation was replaced while compacting")]
    ConversationChanged,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

static PROMPT_TOO_LONG: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)prompt is too long|context_length_exceeded").ok());

impl CompactionError {
    /// Whether this error means the summarization prompt overflowed the model.
    pub fn is_context_overflow(&self) -> bool {
        match self {
            CompactionError::Provider { message } => is_prompt_too_long(message),
            _ => false,
        }
    }

    /// Insufficient-input outcomes are reported to the user, not treated as failures.
    pub fn is_insufficient_input(&self) -> bool {
        matches!(
            self,
            CompactionError::TooFewMessages { .. } | CompactionError::NothingToCompact
        )
    }
}

/// Match known "prompt too long" provider signatures.
pub fn is_prompt_too_long(message: &str) -> bool {
    if PROMPT_TOO_LONG
        .as_ref()
        .is_some_and(|re| re.is_match(message))
    {
        return true;
    }
    let lower = message.to_lowercase();
    lower.contains("maximum") && lower.contains("tokens")
}
