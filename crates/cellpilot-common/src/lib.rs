//! Shared domain types for cellpilot.
//!
//! - [`message`]: the conversation message model consumed by compaction.
//! - [`completion`]: the collaborator interfaces a host supplies for LLM calls.

pub mod completion;
pub mod message;

pub use completion::{
    ApiKeyResolver, CompletionContext, CompletionOptions, ModelInfo, ReasoningEffort,
    StaticApiKeys, StopReason, StreamFn, StreamHandle, StreamResult,
};
pub use message::{
    ArchivedMessagesMessage, ArtifactMessage, AssistantMessage, Attachment,
    CompactionSummaryMessage, ContentBlock, ConversationMessage, ToolResultMessage, UserContent,
    UserMessage, UserWithAttachmentsMessage, join_text_blocks,
};
