//! Conversation message model.
//!
//! Messages are serialized as JSON objects tagged by `role`. The known roles map
//! onto the variants of [`ConversationMessage`]; any other role is preserved
//! verbatim as [`ConversationMessage::Custom`] so that host extensions survive a
//! load/save cycle untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::completion::StopReason;

/// A single block of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolCall {
        id: String,
        name: String,
        #[serde(default)]
        arguments: Value,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn thinking(thinking: impl Into<String>) -> Self {
        Self::Thinking {
            thinking: thinking.into(),
        }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self::ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    pub fn image(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self::Image {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// User content is either a bare string or a list of blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl UserContent {
    /// Concatenated text of the content, blocks joined by newlines.
    pub fn text(&self) -> String {
        match self {
            UserContent::Text(text) => text.clone(),
            UserContent::Blocks(blocks) => join_text_blocks(blocks),
        }
    }
}

impl Default for UserContent {
    fn default() -> Self {
        UserContent::Text(String::new())
    }
}

/// Join all `text` blocks with newlines, ignoring every other block kind.
pub fn join_text_blocks(blocks: &[ContentBlock]) -> String {
    let mut out = String::new();
    for block in blocks {
        if let ContentBlock::Text { text } = block {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(text);
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub content: UserContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// A file attached to a user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub file_name: String,
    pub mime_type: String,
    #[serde(default)]
    pub size: u64,
    /// Text extracted from the attachment, sent to the model alongside the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserWithAttachmentsMessage {
    pub content: UserContent,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantMessage {
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl AssistantMessage {
    pub fn has_tool_calls(&self) -> bool {
        self.content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolCall { .. }))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultMessage {
    pub tool_call_id: String,
    pub tool_name: String,
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// Boundary marker: everything before it has been permanently summarized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionSummaryMessage {
    pub summary: String,
    /// Chat messages replaced by this summary, cumulative across compactions.
    pub summarized_count: usize,
    #[serde(default)]
    pub tokens_before: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// Verbatim messages removed from the live context, kept for export and audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedMessagesMessage {
    pub messages: Vec<ConversationMessage>,
    pub chat_message_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// UI-only artifact record. Never sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactMessage {
    pub filename: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// A message in a conversation, in canonical order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum ConversationMessage {
    User(UserMessage),
    UserWithAttachments(UserWithAttachmentsMessage),
    Assistant(AssistantMessage),
    ToolResult(ToolResultMessage),
    CompactionSummary(CompactionSummaryMessage),
    ArchivedMessages(ArchivedMessagesMessage),
    Artifact(ArtifactMessage),
    /// A role this crate does not know; `raw` is the original JSON object.
    Custom { role: String, raw: Value },
}

pub const ROLE_USER: &str = "user";
pub const ROLE_USER_WITH_ATTACHMENTS: &str = "user-with-attachments";
pub const ROLE_ASSISTANT: &str = "assistant";
pub const ROLE_TOOL_RESULT: &str = "toolResult";
pub const ROLE_COMPACTION_SUMMARY: &str = "compactionSummary";
pub const ROLE_ARCHIVED_MESSAGES: &str = "archivedMessages";
pub const ROLE_ARTIFACT: &str = "artifact";

const KNOWN_ROLES: [&str; 7] = [
    ROLE_USER,
    ROLE_USER_WITH_ATTACHMENTS,
    ROLE_ASSISTANT,
    ROLE_TOOL_RESULT,
    ROLE_COMPACTION_SUMMARY,
    ROLE_ARCHIVED_MESSAGES,
    ROLE_ARTIFACT,
];

// Wire shape of the known roles.
#[derive(Serialize, Deserialize)]
#[serde(tag = "role")]
enum KnownMessage {
    #[serde(rename = "user")]
    User(UserMessage),
    #[serde(rename = "user-with-attachments")]
    UserWithAttachments(UserWithAttachmentsMessage),
    #[serde(rename = "assistant")]
    Assistant(AssistantMessage),
    #[serde(rename = "toolResult")]
    ToolResult(ToolResultMessage),
    #[serde(rename = "compactionSummary")]
    CompactionSummary(CompactionSummaryMessage),
    #[serde(rename = "archivedMessages")]
    ArchivedMessages(ArchivedMessagesMessage),
    #[serde(rename = "artifact")]
    Artifact(ArtifactMessage),
}

impl TryFrom<Value> for ConversationMessage {
    type Error = serde_json::Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let role = value
            .get("role")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                <serde_json::Error as serde::de::Error>::custom("message is missing a string `role`")
            })?;

        if !KNOWN_ROLES.contains(&role.as_str()) {
            return Ok(ConversationMessage::Custom { role, raw: value });
        }

        Ok(match serde_json::from_value::<KnownMessage>(value)? {
            KnownMessage::User(m) => ConversationMessage::User(m),
            KnownMessage::UserWithAttachments(m) => ConversationMessage::UserWithAttachments(m),
            KnownMessage::Assistant(m) => ConversationMessage::Assistant(m),
            KnownMessage::ToolResult(m) => ConversationMessage::ToolResult(m),
            KnownMessage::CompactionSummary(m) => ConversationMessage::CompactionSummary(m),
            KnownMessage::ArchivedMessages(m) => ConversationMessage::ArchivedMessages(m),
            KnownMessage::Artifact(m) => ConversationMessage::Artifact(m),
        })
    }
}

impl From<ConversationMessage> for Value {
    fn from(message: ConversationMessage) -> Self {
        let known = match message {
            ConversationMessage::Custom { raw, .. } => return raw,
            ConversationMessage::User(m) => KnownMessage::User(m),
            ConversationMessage::UserWithAttachments(m) => KnownMessage::UserWithAttachments(m),
            ConversationMessage::Assistant(m) => KnownMessage::Assistant(m),
            ConversationMessage::ToolResult(m) => KnownMessage::ToolResult(m),
            ConversationMessage::CompactionSummary(m) => KnownMessage::CompactionSummary(m),
            ConversationMessage::ArchivedMessages(m) => KnownMessage::ArchivedMessages(m),
            ConversationMessage::Artifact(m) => KnownMessage::Artifact(m),
        };
        // Every field is string-keyed, so conversion cannot fail.
        serde_json::to_value(known).unwrap_or(Value::Null)
    }
}

impl ConversationMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self::User(UserMessage {
            content: UserContent::Text(text.into()),
            timestamp: None,
        })
    }

    pub fn user_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self::User(UserMessage {
            content: UserContent::Blocks(blocks),
            timestamp: None,
        })
    }

    pub fn user_with_attachments(text: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self::UserWithAttachments(UserWithAttachmentsMessage {
            content: UserContent::Text(text.into()),
            attachments,
            timestamp: None,
        })
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self::Assistant(AssistantMessage {
            content,
            stop_reason: None,
            model: None,
            timestamp: None,
        })
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::assistant(vec![ContentBlock::text(text)])
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        text: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::ToolResult(ToolResultMessage {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            content: vec![ContentBlock::text(text)],
            is_error,
            timestamp: None,
        })
    }

    pub fn compaction_summary(summary: impl Into<String>, summarized_count: usize) -> Self {
        Self::CompactionSummary(CompactionSummaryMessage {
            summary: summary.into(),
            summarized_count,
            tokens_before: 0,
            timestamp: None,
        })
    }

    pub fn artifact(filename: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Artifact(ArtifactMessage {
            filename: filename.into(),
            action: "create".to_string(),
            content: content.into(),
            timestamp: None,
        })
    }

    /// The wire role of this message.
    pub fn role(&self) -> &str {
        match self {
            ConversationMessage::User(_) => ROLE_USER,
            ConversationMessage::UserWithAttachments(_) => ROLE_USER_WITH_ATTACHMENTS,
            ConversationMessage::Assistant(_) => ROLE_ASSISTANT,
            ConversationMessage::ToolResult(_) => ROLE_TOOL_RESULT,
            ConversationMessage::CompactionSummary(_) => ROLE_COMPACTION_SUMMARY,
            ConversationMessage::ArchivedMessages(_) => ROLE_ARCHIVED_MESSAGES,
            ConversationMessage::Artifact(_) => ROLE_ARTIFACT,
            ConversationMessage::Custom { role, .. } => role,
        }
    }

    /// User, user-with-attachments and assistant messages count as turns.
    pub fn is_chat_turn(&self) -> bool {
        matches!(
            self,
            ConversationMessage::User(_)
                | ConversationMessage::UserWithAttachments(_)
                | ConversationMessage::Assistant(_)
        )
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, ConversationMessage::ToolResult(_))
    }

    pub fn is_compaction_boundary(&self) -> bool {
        matches!(self, ConversationMessage::CompactionSummary(_))
    }

    pub fn as_compaction_summary(&self) -> Option<&CompactionSummaryMessage> {
        match self {
            ConversationMessage::CompactionSummary(summary) => Some(summary),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_user_text() {
        let json = r#"{"role":"user","content":"Sum column B"}"#;
        let msg: ConversationMessage = serde_json::from_str(json).unwrap();
        match &msg {
            ConversationMessage::User(user) => assert_eq!(user.content.text(), "Sum column B"),
            _ => panic!("Expected User"),
        }
        assert!(msg.is_chat_turn());
    }

    #[test]
    fn test_parse_assistant_with_tool_call() {
        let json = r#"{"role":"assistant","content":[
            {"type":"thinking","thinking":"Need the range"},
            {"type":"toolCall","id":"call_1","name":"read_range","arguments":{"range":"A1:B4"}}
        ],"stopReason":"toolUse"}"#;
        let msg: ConversationMessage = serde_json::from_str(json).unwrap();
        let ConversationMessage::Assistant(assistant) = &msg else {
            panic!("Expected Assistant");
        };
        assert!(assistant.has_tool_calls());
        assert_eq!(assistant.stop_reason, Some(StopReason::ToolUse));
        match &assistant.content[1] {
            ContentBlock::ToolCall { name, arguments, .. } => {
                assert_eq!(name, "read_range");
                assert_eq!(arguments["range"], "A1:B4");
            }
            _ => panic!("Expected ToolCall"),
        }
    }

    #[test]
    fn test_parse_tool_result() {
        let json = r#"{"role":"toolResult","toolCallId":"call_1","toolName":"read_range",
            "content":[{"type":"text","text":"1,2,3"}],"isError":true}"#;
        let msg: ConversationMessage = serde_json::from_str(json).unwrap();
        let ConversationMessage::ToolResult(result) = &msg else {
            panic!("Expected ToolResult");
        };
        assert_eq!(result.tool_name, "read_range");
        assert!(result.is_error);
        assert!(msg.is_tool_result());
        assert!(!msg.is_chat_turn());
    }

    #[test]
    fn test_unknown_role_round_trips_verbatim() {
        let raw = json!({"role": "navigation", "target": "Sheet2", "extra": [1, 2]});
        let msg: ConversationMessage = serde_json::from_value(raw.clone()).unwrap();
        match &msg {
            ConversationMessage::Custom { role, .. } => assert_eq!(role, "navigation"),
            _ => panic!("Expected Custom"),
        }
        assert_eq!(serde_json::to_value(&msg).unwrap(), raw);
    }

    #[test]
    fn test_missing_role_is_rejected() {
        let result: Result<ConversationMessage, _> =
            serde_json::from_value(json!({"content": "hi"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_archived_messages_nest() {
        let archived = ConversationMessage::ArchivedMessages(ArchivedMessagesMessage {
            messages: vec![
                ConversationMessage::user("first"),
                ConversationMessage::assistant_text("second"),
            ],
            chat_message_count: 2,
            timestamp: None,
        });
        let value = serde_json::to_value(&archived).unwrap();
        assert_eq!(value["role"], "archivedMessages");
        assert_eq!(value["chatMessageCount"], 2);
        assert_eq!(value["messages"][0]["role"], "user");

        let back: ConversationMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back, archived);
    }

    #[test]
    fn test_user_blocks_text_joins_text_only() {
        let content = UserContent::Blocks(vec![
            ContentBlock::text("line one"),
            ContentBlock::image("aGVsbG8=", "image/png"),
            ContentBlock::text("line two"),
        ]);
        assert_eq!(content.text(), "line one\nline two");
    }

    #[test]
    fn test_roles() {
        assert_eq!(ConversationMessage::user("x").role(), "user");
        assert_eq!(
            ConversationMessage::user_with_attachments("x", vec![]).role(),
            "user-with-attachments"
        );
        assert_eq!(
            ConversationMessage::compaction_summary("s", 3).role(),
            "compactionSummary"
        );
        assert!(ConversationMessage::compaction_summary("s", 3).is_compaction_boundary());
        assert_eq!(ConversationMessage::artifact("a.html", "").role(), "artifact");
    }
}
