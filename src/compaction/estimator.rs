//! Token estimation heuristic.
//!
//! `ceil(chars / 4)` per message. Images are charged a flat 4800 characters;
//! artifacts, archives and unknown roles never reach the model and cost nothing.

use cellpilot_common::{ContentBlock, ConversationMessage, UserContent};

use super::{CHARS_PER_TOKEN, IMAGE_CHAR_ESTIMATE};

pub fn chars_to_tokens(chars: usize) -> usize {
    chars.div_ceil(CHARS_PER_TOKEN)
}

/// Estimated tokens for one message.
pub fn estimate_tokens(message: &ConversationMessage) -> usize {
    chars_to_tokens(estimate_chars(message))
}

pub fn estimate_conversation_tokens(messages: &[ConversationMessage]) -> usize {
    messages.iter().map(estimate_tokens).sum()
}

/// Character equivalent of a message's model-visible content.
pub fn estimate_chars(message: &ConversationMessage) -> usize {
    match message {
        ConversationMessage::User(m) => user_content_chars(&m.content),
        ConversationMessage::UserWithAttachments(m) => {
            let extracted: usize = m
                .attachments
                .iter()
                .filter_map(|a| a.extracted_text.as_deref())
                .map(|text| text.chars().count())
                .sum();
            user_content_chars(&m.content) + extracted
        }
        ConversationMessage::Assistant(m) => blocks_chars(&m.content),
        ConversationMessage::ToolResult(m) => blocks_chars(&m.content),
        ConversationMessage::CompactionSummary(m) => m.summary.chars().count(),
        ConversationMessage::ArchivedMessages(_)
        | ConversationMessage::Artifact(_)
        | ConversationMessage::Custom { .. } => 0,
    }
}

/// Number of user, user-with-attachments and assistant messages.
pub fn count_chat_messages(messages: &[ConversationMessage]) -> usize {
    messages.iter().filter(|m| m.is_chat_turn()).count()
}

fn user_content_chars(content: &UserContent) -> usize {
    match content {
        UserContent::Text(text) => text.chars().count(),
        UserContent::Blocks(blocks) => blocks_chars(blocks),
    }
}

fn blocks_chars(blocks: &[ContentBlock]) -> usize {
    blocks.iter().map(block_chars).sum()
}

fn block_chars(block: &ContentBlock) -> usize {
    match block {
        ContentBlock::Text { text } => text.chars().count(),
        ContentBlock::Thinking { thinking } => thinking.chars().count(),
        ContentBlock::ToolCall {
            name, arguments, ..
        } => {
            let args = serde_json::to_string(arguments).map_or(0, |s| s.chars().count());
            name.chars().count() + args
        }
        ContentBlock::Image { .. } => IMAGE_CHAR_ESTIMATE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellpilot_common::Attachment;
    use serde_json::json;

    #[test]
    fn test_user_text_rounds_up() {
        assert_eq!(estimate_tokens(&ConversationMessage::user("")), 0);
        assert_eq!(estimate_tokens(&ConversationMessage::user("abcd")), 1);
        assert_eq!(estimate_tokens(&ConversationMessage::user("abcde")), 2);
        let long = "x".repeat(401);
        assert_eq!(estimate_tokens(&ConversationMessage::user(long)), 101);
    }

    #[test]
    fn test_counts_chars_not_bytes() {
        // Four multibyte characters are one token.
        assert_eq!(estimate_tokens(&ConversationMessage::user("äöüß")), 1);
    }

    #[test]
    fn test_image_block_is_flat() {
        let message = ConversationMessage::user_blocks(vec![ContentBlock::image(
            "a".repeat(100_000),
            "image/png",
        )]);
        assert_eq!(estimate_tokens(&message), 1200);

        let mixed = ConversationMessage::user_blocks(vec![
            ContentBlock::text("abcd"),
            ContentBlock::image("", "image/png"),
        ]);
        assert_eq!(estimate_tokens(&mixed), 1201);
    }

    #[test]
    fn test_ui_only_roles_cost_nothing() {
        let artifact = ConversationMessage::artifact("chart.html", "x".repeat(10_000));
        assert_eq!(estimate_tokens(&artifact), 0);

        let custom: ConversationMessage =
            serde_json::from_value(json!({"role": "notice", "text": "y".repeat(500)})).unwrap();
        assert_eq!(estimate_tokens(&custom), 0);
    }

    #[test]
    fn test_assistant_blocks() {
        let message = ConversationMessage::assistant(vec![
            ContentBlock::thinking("plan"),
            ContentBlock::text("done"),
            ContentBlock::tool_call("c1", "read", json!({"a": 1})),
        ]);
        // 4 + 4 + "read" (4) + `{"a":1}` (7) = 19 chars
        assert_eq!(estimate_chars(&message), 19);
        assert_eq!(estimate_tokens(&message), 5);
    }

    #[test]
    fn test_attachments_add_extracted_text() {
        let message = ConversationMessage::user_with_attachments(
            "see file",
            vec![Attachment {
                id: "a1".to_string(),
                file_name: "data.csv".to_string(),
                mime_type: "text/csv".to_string(),
                size: 10,
                extracted_text: Some("1,2,3,4".to_string()),
            }],
        );
        assert_eq!(estimate_chars(&message), 8 + 7);
    }

    #[test]
    fn test_summary_and_conversation_totals() {
        let messages = vec![
            ConversationMessage::compaction_summary("s".repeat(40), 4),
            ConversationMessage::user("abcdefgh"),
            ConversationMessage::tool_result("c1", "read", "abc", false),
        ];
        assert_eq!(estimate_conversation_tokens(&messages), 10 + 2 + 1);
        assert_eq!(count_chat_messages(&messages), 1);
    }
}
