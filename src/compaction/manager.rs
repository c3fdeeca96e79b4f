//! Command boundary for compaction.
//!
//! The CompactionManager:
//! 1. Refuses re-entrant runs on a busy session
//! 2. Runs the engine against a snapshot of the conversation
//! 3. Commits the rewrite in one step, or leaves the conversation untouched
//! 4. Turns every outcome into a status line for the user

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::engine::{CompactOptions, CompactionEngine};
use super::estimator::estimate_conversation_tokens;
use super::rewrite::rewrite_conversation;
use super::tracker::ContextUsage;
use crate::errors::CompactionError;
use crate::session::ConversationSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactStatus {
    Compacted,
    /// Too few messages, or everything already fits the kept budget.
    Skipped,
    Busy,
    Failed,
}

/// What the user is told after `/compact`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompactReport {
    pub status: CompactStatus,
    pub message: String,
    pub summarized_count: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub retried: bool,
}

impl CompactReport {
    fn without_change(status: CompactStatus, message: String) -> Self {
        Self {
            status,
            message,
            summarized_count: 0,
            tokens_before: 0,
            tokens_after: 0,
            retried: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CompactStatus::Compacted
    }
}

#[derive(Clone)]
pub struct CompactionManager {
    engine: CompactionEngine,
}

impl CompactionManager {
    pub fn new(engine: CompactionEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &CompactionEngine {
        &self.engine
    }

    /// Current context pressure for `session`.
    pub fn usage(&self, session: &ConversationSession) -> ContextUsage {
        ContextUsage::measure(
            &session.messages(),
            self.engine.model(),
            self.engine.settings(),
        )
    }

    /// Whether policy allows and context pressure calls for a compaction now.
    pub fn should_auto_compact(&self, session: &ConversationSession) -> bool {
        self.engine.settings().auto_compact && !session.is_busy() && self.usage(session).should_compact()
    }

    /// Compact `session` and report the outcome. Never panics on provider
    /// failures; a failed run leaves the conversation as it was.
    pub async fn run_compact(
        &self,
        session: &ConversationSession,
        focus: Option<String>,
        cancel: Option<CancellationToken>,
    ) -> CompactReport {
        let Some(_busy) = session.try_begin_compaction() else {
            return CompactReport::without_change(
                CompactStatus::Busy,
                CompactionError::Busy.to_string(),
            );
        };

        let snapshot = session.snapshot();
        let options = CompactOptions {
            focus,
            session_id: session.id().to_string(),
            cancel,
        };

        let outcome = match self.engine.compact(&snapshot.messages, &options).await {
            Ok(result) => {
                let rewritten = rewrite_conversation(&snapshot.messages, &result);
                let tokens_after = estimate_conversation_tokens(&rewritten);
                session
                    .commit_rewrite(&snapshot, rewritten)
                    .map(|_| (result, tokens_after))
            }
            Err(err) => Err(err),
        };

        match outcome {
            Ok((result, tokens_after)) => {
                info!(
                    session_id = %session.id(),
                    summarized = result.summarized_count,
                    tokens_before = result.tokens_before,
                    tokens_after,
                    "compaction committed"
                );
                CompactReport {
                    status: CompactStatus::Compacted,
                    message: format!(
                        "Compacted {} messages (~{} tokens before, ~{} after){}",
                        result.summarized_count,
                        result.tokens_before,
                        tokens_after,
                        if result.retried {
                            " after retrying with tighter limits"
                        } else {
                            ""
                        }
                    ),
                    summarized_count: result.summarized_count,
                    tokens_before: result.tokens_before,
                    tokens_after,
                    retried: result.retried,
                }
            }
            Err(err) => failure_report(&err),
        }
    }
}

fn failure_report(err: &CompactionError) -> CompactReport {
    let (status, message) = match err {
        CompactionError::TooFewMessages { found, required } => (
            CompactStatus::Skipped,
            format!(
                "Not enough conversation to compact yet ({} of {} messages)",
                found, required
            ),
        ),
        CompactionError::NothingToCompact => (
            CompactStatus::Skipped,
            "Nothing to compact: recent messages already fit in the kept budget".to_string(),
        ),
        CompactionError::MissingApiKey { provider } => (
            CompactStatus::Failed,
            format!(
                "No API key available for '{}'. Configure credentials and try again.",
                provider
            ),
        ),
        CompactionError::Busy => (CompactStatus::Busy, err.to_string()),
        other => (CompactStatus::Failed, format!("Compaction failed: {}", other)),
    };
    if status == CompactStatus::Failed {
        warn!(error = %err, "compaction failed");
    }
    CompactReport::without_change(status, message)
}
