//! Context pressure tracking for policy-driven compaction.

use cellpilot_common::{ConversationMessage, ModelInfo};

use super::config::{CompactionSettings, ContextLimit};
use super::estimator::{count_chat_messages, estimate_conversation_tokens};
use super::cut_point::find_boundary_start;

/// Snapshot of how full the live context is.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextUsage {
    /// Estimated tokens of the conversation.
    pub used_tokens: usize,
    /// `context_window - reserve_tokens`.
    pub available_tokens: usize,
    pub limit: ContextLimit,
    /// Unsummarized chat messages.
    pub eligible_messages: usize,
    min_messages: usize,
}

impl ContextUsage {
    pub fn measure(
        messages: &[ConversationMessage],
        model: &ModelInfo,
        settings: &CompactionSettings,
    ) -> Self {
        let boundary = find_boundary_start(messages);
        Self {
            used_tokens: estimate_conversation_tokens(messages),
            available_tokens: settings.available_tokens(model),
            limit: settings.context_limit.clone(),
            eligible_messages: count_chat_messages(&messages[boundary..]),
            min_messages: settings.min_messages,
        }
    }

    /// Token limit the conversation should stay under.
    pub fn effective_limit(&self) -> usize {
        self.limit.effective_limit(self.available_tokens)
    }

    pub fn usage_percentage(&self) -> f32 {
        let limit = self.effective_limit();
        if limit == 0 {
            return 100.0;
        }
        (self.used_tokens as f32 / limit as f32) * 100.0
    }

    pub fn remaining_tokens(&self) -> usize {
        self.effective_limit().saturating_sub(self.used_tokens)
    }

    /// At or over the limit with enough unsummarized history to be worth it.
    pub fn should_compact(&self) -> bool {
        self.eligible_messages >= self.min_messages && self.used_tokens >= self.effective_limit()
    }

    pub fn status_summary(&self) -> String {
        format!(
            "Context: {:.1}% used ({} / {} tokens, limit {}), {} unsummarized messages",
            self.usage_percentage(),
            self.used_tokens,
            self.effective_limit(),
            self.limit,
            self.eligible_messages
        )
    }
}
