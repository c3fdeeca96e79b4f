//! Boundary and cut-point selection.

use cellpilot_common::ConversationMessage;

use super::estimator::estimate_tokens;

/// First index after the most recent `compactionSummary`, or 0.
pub fn find_boundary_start(messages: &[ConversationMessage]) -> usize {
    messages
        .iter()
        .rposition(ConversationMessage::is_compaction_boundary)
        .map_or(0, |index| index + 1)
}

/// Index where the kept tail begins.
///
/// Walks back from the end accumulating estimated tokens until
/// `keep_recent_tokens` is reached; the message that crossed the budget is the
/// first kept one. If it is a tool result the cut moves back onto the assistant
/// message that issued the call. When the whole eligible region fits in the
/// budget the result is `boundary_start`, meaning there is nothing to summarize.
pub fn find_cut_point(
    messages: &[ConversationMessage],
    boundary_start: usize,
    keep_recent_tokens: usize,
) -> usize {
    let mut accumulated = 0usize;
    let mut cut = boundary_start;

    for index in (boundary_start..messages.len()).rev() {
        accumulated += estimate_tokens(&messages[index]);
        if accumulated >= keep_recent_tokens {
            cut = index;
            break;
        }
    }

    while cut > boundary_start && messages[cut].is_tool_result() {
        cut -= 1;
    }
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellpilot_common::ContentBlock;
    use serde_json::json;

    /// A user message costing exactly `tokens`.
    fn user(tokens: usize) -> ConversationMessage {
        ConversationMessage::user("u".repeat(tokens * 4))
    }

    fn assistant(tokens: usize) -> ConversationMessage {
        ConversationMessage::assistant_text("a".repeat(tokens * 4))
    }

    #[test]
    fn test_boundary_without_summary() {
        let messages = vec![user(1), assistant(1)];
        assert_eq!(find_boundary_start(&messages), 0);
        assert_eq!(find_boundary_start(&[]), 0);
    }

    #[test]
    fn test_boundary_after_latest_summary() {
        let messages = vec![
            ConversationMessage::compaction_summary("old", 2),
            user(1),
            ConversationMessage::compaction_summary("new", 4),
            user(1),
        ];
        assert_eq!(find_boundary_start(&messages), 3);
    }

    #[test]
    fn test_cut_where_budget_reached() {
        let messages = vec![user(100), assistant(100), user(100), assistant(100)];
        assert_eq!(find_cut_point(&messages, 0, 150), 2);
        assert_eq!(find_cut_point(&messages, 0, 200), 2);
        assert_eq!(find_cut_point(&messages, 0, 201), 1);
    }

    #[test]
    fn test_budget_never_reached_returns_boundary() {
        let messages = vec![user(10), assistant(10)];
        assert_eq!(find_cut_point(&messages, 0, 1000), 0);
        assert_eq!(find_cut_point(&[], 0, 10), 0);
    }

    #[test]
    fn test_cut_moves_off_tool_results() {
        let messages = vec![
            user(100),
            ConversationMessage::assistant(vec![ContentBlock::tool_call(
                "c1",
                "read_range",
                json!({}),
            )]),
            ConversationMessage::tool_result("c1", "read_range", "r".repeat(400), false),
            ConversationMessage::tool_result("c2", "read_range", "r".repeat(400), false),
            assistant(100),
        ];
        // Budget is crossed at index 3, a tool result.
        assert_eq!(find_cut_point(&messages, 0, 200), 1);
    }

    #[test]
    fn test_cut_may_stop_on_boundary_tool_result() {
        let messages = vec![
            ConversationMessage::compaction_summary("s", 2),
            ConversationMessage::tool_result("c1", "read", "r".repeat(400), false),
            assistant(100),
        ];
        assert_eq!(find_cut_point(&messages, 1, 150), 1);
    }

    #[test]
    fn test_cut_never_opens_on_tool_result() {
        let mut messages = vec![user(5)];
        for i in 0..20 {
            messages.push(assistant(3 + i % 4));
            messages.push(ConversationMessage::tool_result(
                format!("c{i}"),
                "read",
                "x".repeat(4 * (i % 7)),
                false,
            ));
        }
        for keep in 1..120 {
            let cut = find_cut_point(&messages, 0, keep);
            assert!(cut == 0 || !messages[cut].is_tool_result(), "keep {keep} cut {cut}");
        }
    }
}
