//! Completion collaborator interfaces.
//!
//! The host owns the actual LLM transport (proxy routing, credentials, retries at
//! the HTTP level). Core code only sees a [`StreamFn`] that turns a request into a
//! [`StreamHandle`], and an [`ApiKeyResolver`] for credentials.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::message::{ContentBlock, ConversationMessage, join_text_blocks};

/// Model metadata needed for budget math.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub provider: String,
    pub id: String,
    /// Total context window in tokens.
    pub context_window: u32,
    /// Maximum output tokens the model accepts.
    pub max_tokens: u32,
}

impl ModelInfo {
    pub fn new(
        provider: impl Into<String>,
        id: impl Into<String>,
        context_window: u32,
        max_tokens: u32,
    ) -> Self {
        Self {
            provider: provider.into(),
            id: id.into(),
            context_window,
            max_tokens,
        }
    }
}

/// Why the model stopped producing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    Stop,
    Length,
    ToolUse,
    Error,
    Aborted,
}

impl StopReason {
    pub fn is_failure(self) -> bool {
        matches!(self, StopReason::Error | StopReason::Aborted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

/// Prompt sent to the model.
#[derive(Debug, Clone)]
pub struct CompletionContext {
    pub system_prompt: String,
    pub messages: Vec<ConversationMessage>,
}

/// Per-call options.
#[derive(Clone)]
pub struct CompletionOptions {
    pub api_key: String,
    pub session_id: String,
    pub max_tokens: u32,
    pub reasoning: Option<ReasoningEffort>,
    pub temperature: Option<f32>,
    /// Fires when the caller gives up; implementations should stop streaming.
    pub cancel: Option<CancellationToken>,
}

impl fmt::Debug for CompletionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionOptions")
            .field("api_key", &"<redacted>")
            .field("session_id", &self.session_id)
            .field("max_tokens", &self.max_tokens)
            .field("reasoning", &self.reasoning)
            .field("temperature", &self.temperature)
            .field("cancel", &self.cancel.is_some())
            .finish()
    }
}

/// Final outcome of one streamed completion.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamResult {
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    pub error_message: Option<String>,
}

impl StreamResult {
    /// A successful result carrying a single text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            stop_reason: StopReason::Stop,
            error_message: None,
        }
    }

    /// A failed result carrying a provider error message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: Vec::new(),
            stop_reason: StopReason::Error,
            error_message: Some(message.into()),
        }
    }

    pub fn aborted() -> Self {
        Self {
            content: Vec::new(),
            stop_reason: StopReason::Aborted,
            error_message: None,
        }
    }

    /// Text blocks joined by newlines.
    pub fn text_content(&self) -> String {
        join_text_blocks(&self.content)
    }
}

/// An in-flight completion. Awaiting [`StreamHandle::result`] drives it to the end.
pub struct StreamHandle {
    inner: BoxFuture<'static, anyhow::Result<StreamResult>>,
}

impl StreamHandle {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = anyhow::Result<StreamResult>> + Send + 'static,
    {
        Self {
            inner: future.boxed(),
        }
    }

    pub fn ready(result: anyhow::Result<StreamResult>) -> Self {
        Self::new(futures::future::ready(result))
    }

    pub async fn result(self) -> anyhow::Result<StreamResult> {
        self.inner.await
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle").finish_non_exhaustive()
    }
}

/// The host's configured streaming completion function.
pub trait StreamFn: Send + Sync {
    fn stream(
        &self,
        model: &ModelInfo,
        context: CompletionContext,
        options: CompletionOptions,
    ) -> StreamHandle;
}

/// Resolves provider credentials.
#[async_trait]
pub trait ApiKeyResolver: Send + Sync {
    async fn get_api_key(&self, provider: &str) -> Option<String>;
}

/// A fixed provider → key table.
#[derive(Debug, Clone, Default)]
pub struct StaticApiKeys {
    keys: HashMap<String, String>,
}

impl StaticApiKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, provider: impl Into<String>, key: impl Into<String>) -> Self {
        self.keys.insert(provider.into(), key.into());
        self
    }
}

#[async_trait]
impl ApiKeyResolver for StaticApiKeys {
    async fn get_api_key(&self, provider: &str) -> Option<String> {
        self.keys
            .get(provider)
            .filter(|key| !key.trim().is_empty())
            .cloned()
    }
}
