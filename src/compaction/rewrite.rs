//! Conversation rewrite after a successful summary.

use cellpilot_common::{ArchivedMessagesMessage, CompactionSummaryMessage, ConversationMessage};
use chrono::Utc;

use super::engine::CompactionResult;

/// Fold the frozen region and the newly summarized slice into one archive.
///
/// Earlier archives contribute their payload and count. The previous summary is
/// dropped because the new one was seeded with it. Anything else in the frozen
/// region is carried over verbatim.
pub fn merge_archive(
    frozen: &[ConversationMessage],
    newly_archived: &[ConversationMessage],
    newly_summarized: usize,
) -> ArchivedMessagesMessage {
    let mut messages = Vec::new();
    let mut chat_message_count = 0;

    for message in frozen {
        match message {
            ConversationMessage::ArchivedMessages(archive) => {
                messages.extend(archive.messages.iter().cloned());
                chat_message_count += archive.chat_message_count;
            }
            ConversationMessage::CompactionSummary(_) => {}
            other => {
                if other.is_chat_turn() {
                    chat_message_count += 1;
                }
                messages.push(other.clone());
            }
        }
    }

    messages.extend(newly_archived.iter().cloned());
    chat_message_count += newly_summarized;

    ArchivedMessagesMessage {
        messages,
        chat_message_count,
        timestamp: Some(Utc::now().timestamp_millis()),
    }
}

/// Build `[archive, summary, ...kept]` from the list `result` was computed on.
pub fn rewrite_conversation(
    original: &[ConversationMessage],
    result: &CompactionResult,
) -> Vec<ConversationMessage> {
    let frozen = &original[..result.boundary_start.min(original.len())];
    let archive = merge_archive(frozen, &result.messages_to_archive, result.summarized_count);

    let summary = CompactionSummaryMessage {
        summary: result.summary.clone(),
        summarized_count: archive.chat_message_count,
        tokens_before: result.tokens_before as u64,
        timestamp: archive.timestamp,
    };

    let mut rewritten = Vec::with_capacity(result.kept_messages.len() + 2);
    rewritten.push(ConversationMessage::ArchivedMessages(archive));
    rewritten.push(ConversationMessage::CompactionSummary(summary));
    rewritten.extend(result.kept_messages.iter().cloned());
    rewritten
}
