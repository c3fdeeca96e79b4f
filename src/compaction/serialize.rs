//! Flat transcript rendering for the summarization prompt.

use cellpilot_common::{ContentBlock, ConversationMessage, join_text_blocks};
use serde::{Deserialize, Serialize};

/// Marker placed between the kept head and tail of a truncated text.
pub const TRUNCATION_MARKER: &str = "…[truncated]…";

/// Per-role character caps used when rendering a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializeLimits {
    pub max_user_chars: usize,
    pub max_assistant_chars: usize,
    pub max_tool_result_chars: usize,
}

impl SerializeLimits {
    pub const DEFAULT: Self = Self {
        max_user_chars: 8000,
        max_assistant_chars: 8000,
        max_tool_result_chars: 4000,
    };

    /// Tight caps used when retrying after a "prompt too long" failure.
    pub const AGGRESSIVE: Self = Self {
        max_user_chars: 2000,
        max_assistant_chars: 2000,
        max_tool_result_chars: 800,
    };
}

impl Default for SerializeLimits {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Keep the head and tail of `text` around [`TRUNCATION_MARKER`] so the result
/// is at most `max` characters.
///
/// When `max` is smaller than the marker there is no room for it and the first
/// `max` characters are returned.
pub fn truncate_middle(text: &str, max: usize) -> String {
    let len = text.chars().count();
    if len <= max {
        return text.to_string();
    }

    let marker_len = TRUNCATION_MARKER.chars().count();
    if max < marker_len {
        return text.chars().take(max).collect();
    }

    let budget = max - marker_len;
    let head = budget.div_ceil(2);
    let tail = budget - head;

    let mut out = String::with_capacity(max * 4);
    out.extend(text.chars().take(head));
    out.push_str(TRUNCATION_MARKER);
    out.extend(text.chars().skip(len - tail));
    out
}

/// Render messages as `[Role]: text` paragraphs separated by blank lines.
///
/// Only user, assistant and tool-result messages appear; every other role is
/// skipped.
pub fn serialize_conversation(messages: &[ConversationMessage], limits: &SerializeLimits) -> String {
    messages
        .iter()
        .filter_map(|message| serialize_message(message, limits))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn serialize_message(message: &ConversationMessage, limits: &SerializeLimits) -> Option<String> {
    match message {
        ConversationMessage::User(m) => user_line(&m.content.text(), limits),
        ConversationMessage::UserWithAttachments(m) => {
            // Extracted attachment text reaches the model with the message.
            let mut text = m.content.text();
            for attachment in &m.attachments {
                if let Some(extracted) = attachment.extracted_text.as_deref() {
                    if !text.is_empty() {
                        text.push_str("\n\n");
                    }
                    text.push_str(&format!("<{}>\n{}", attachment.file_name, extracted));
                }
            }
            user_line(&text, limits)
        }
        ConversationMessage::Assistant(m) => {
            let max = limits.max_assistant_chars;
            let mut lines = Vec::new();

            let thinking = join_blocks(&m.content, |block| match block {
                ContentBlock::Thinking { thinking } => Some(thinking.clone()),
                _ => None,
            });
            if !thinking.is_empty() {
                lines.push(format!("[Assistant thinking]: {}", truncate_middle(&thinking, max)));
            }

            let text = join_text_blocks(&m.content);
            if !text.is_empty() {
                lines.push(format!("[Assistant]: {}", truncate_middle(&text, max)));
            }

            let calls: Vec<String> = m
                .content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolCall {
                        name, arguments, ..
                    } => {
                        // Unserializable arguments still render the call.
                        let args =
                            serde_json::to_string(arguments).unwrap_or_else(|_| "{}".to_string());
                        Some(format!("{}({})", name, args))
                    }
                    _ => None,
                })
                .collect();
            if !calls.is_empty() {
                lines.push(format!(
                    "[Assistant tool calls]: {}",
                    truncate_middle(&calls.join("; "), max)
                ));
            }

            (!lines.is_empty()).then(|| lines.join("\n"))
        }
        ConversationMessage::ToolResult(m) => {
            let label = if m.is_error {
                format!("[Tool result {}(error)]", m.tool_name)
            } else {
                format!("[Tool result {}]", m.tool_name)
            };
            let text = join_text_blocks(&m.content);
            Some(format!(
                "{}: {}",
                label,
                truncate_middle(&text, limits.max_tool_result_chars)
            ))
        }
        ConversationMessage::CompactionSummary(_)
        | ConversationMessage::ArchivedMessages(_)
        | ConversationMessage::Artifact(_)
        | ConversationMessage::Custom { .. } => None,
    }
}

fn user_line(text: &str, limits: &SerializeLimits) -> Option<String> {
    if text.is_empty() {
        return None;
    }
    Some(format!(
        "[User]: {}",
        truncate_middle(text, limits.max_user_chars)
    ))
}

fn join_blocks(blocks: &[ContentBlock], pick: impl Fn(&ContentBlock) -> Option<String>) -> String {
    blocks.iter().filter_map(pick).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truncate_short_text_unchanged() {
        assert_eq!(truncate_middle("hello", 10), "hello");
        assert_eq!(truncate_middle("hello", 5), "hello");
    }

    #[test]
    fn test_truncate_keeps_prefix_and_suffix() {
        let text: String = ('a'..='z').cycle().take(100).collect();
        let out = truncate_middle(&text, 33);
        assert_eq!(out.chars().count(), 33);
        assert!(out.contains(TRUNCATION_MARKER));

        let (head, tail) = out.split_once(TRUNCATION_MARKER).unwrap();
        assert!(text.starts_with(head));
        assert!(text.ends_with(tail));
        // 20 chars of budget split evenly.
        assert_eq!(head.chars().count(), 10);
        assert_eq!(tail.chars().count(), 10);
    }

    #[test]
    fn test_truncate_odd_budget_favours_head() {
        let text = "x".repeat(50);
        let out = truncate_middle(&text, 16);
        let (head, tail) = out.split_once(TRUNCATION_MARKER).unwrap();
        assert_eq!(head.len(), 2);
        assert_eq!(tail.len(), 1);
    }

    #[test]
    fn test_truncate_never_exceeds_max() {
        let text = "ümlaut ".repeat(40);
        for max in [1, 5, 12, 13, 14, 50, 200] {
            let out = truncate_middle(&text, max);
            assert!(out.chars().count() <= max, "max {} gave {}", max, out);
            if max >= TRUNCATION_MARKER.chars().count() {
                assert!(out.contains(TRUNCATION_MARKER));
            }
        }
    }

    #[test]
    fn test_truncate_cap_smaller_than_marker() {
        assert_eq!(truncate_middle("abcdefghijklmnopqrstuvwxyz", 4), "abcd");
        assert_eq!(truncate_middle("abcdef", 0), "");
    }

    #[test]
    fn test_serialize_roles() {
        let messages = vec![
            ConversationMessage::user("Sum column B"),
            ConversationMessage::assistant(vec![
                ContentBlock::thinking("need the range"),
                ContentBlock::text("Reading the sheet."),
                ContentBlock::tool_call("c1", "read_range", json!({"range": "B1:B10"})),
                ContentBlock::tool_call("c2", "get_sheets", json!({})),
            ]),
            ConversationMessage::tool_result("c1", "read_range", "1,2,3", false),
            ConversationMessage::tool_result("c2", "get_sheets", "denied", true),
            ConversationMessage::artifact("chart.html", "<div/>"),
        ];

        let out = serialize_conversation(&messages, &SerializeLimits::DEFAULT);
        let expected = "[User]: Sum column B\n\n\
            [Assistant thinking]: need the range\n\
            [Assistant]: Reading the sheet.\n\
            [Assistant tool calls]: read_range({\"range\":\"B1:B10\"}); get_sheets({})\n\n\
            [Tool result read_range]: 1,2,3\n\n\
            [Tool result get_sheets(error)]: denied";
        assert_eq!(out, expected);
    }

    #[test]
    fn test_serialize_applies_role_limits() {
        let messages = vec![
            ConversationMessage::user("u".repeat(3000)),
            ConversationMessage::tool_result("c1", "read", "t".repeat(3000), false),
        ];
        let out = serialize_conversation(&messages, &SerializeLimits::AGGRESSIVE);
        let parts: Vec<&str> = out.split("\n\n").collect();
        assert_eq!(parts[0].chars().count(), "[User]: ".len() + 2000);
        assert_eq!(
            parts[1].chars().count(),
            "[Tool result read]: ".len() + 800
        );
    }

    #[test]
    fn test_serialize_includes_extracted_attachment_text() {
        let with_text = |name: &str, text: Option<&str>| cellpilot_common::Attachment {
            id: name.to_string(),
            file_name: name.to_string(),
            mime_type: "text/csv".to_string(),
            size: 0,
            extracted_text: text.map(str::to_string),
        };
        let message = ConversationMessage::user_with_attachments(
            "Import this",
            vec![
                with_text("q3.csv", Some("region,total\nnorth,12")),
                with_text("logo.png", None),
            ],
        );
        assert_eq!(
            serialize_conversation(&[message], &SerializeLimits::default()),
            "[User]: Import this\n\n<q3.csv>\nregion,total\nnorth,12"
        );
    }

    #[test]
    fn test_serialize_skips_summaries_and_unknown_roles() {
        let custom: ConversationMessage =
            serde_json::from_value(json!({"role": "notice", "text": "hi"})).unwrap();
        let messages = vec![
            ConversationMessage::compaction_summary("## Goal", 2),
            custom,
            ConversationMessage::user("hello"),
        ];
        assert_eq!(
            serialize_conversation(&messages, &SerializeLimits::default()),
            "[User]: hello"
        );
    }
}
