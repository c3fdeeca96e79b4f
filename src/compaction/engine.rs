//! Summarization pass: plan, prompt, call the model, retry once on overflow.

use std::sync::Arc;

use cellpilot_common::{
    ApiKeyResolver, CompletionContext, CompletionOptions, ConversationMessage, ModelInfo,
    ReasoningEffort, StopReason, StreamFn,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::CompactionSettings;
use super::cut_point::{find_boundary_start, find_cut_point};
use super::estimator::{count_chat_messages, estimate_conversation_tokens};
use super::prompt::{SUMMARIZATION_SYSTEM_PROMPT, build_summary_prompt, missing_sections};
use super::serialize::{SerializeLimits, serialize_conversation};
use crate::errors::CompactionError;

/// Per-invocation options.
#[derive(Debug, Clone, Default)]
pub struct CompactOptions {
    /// Extra instruction appended to the prompt ("focus on the pivot tables").
    pub focus: Option<String>,
    pub session_id: String,
    pub cancel: Option<CancellationToken>,
}

/// Where one pass would cut a conversation. Computed without any model call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionPlan {
    /// First index eligible for summarization.
    pub boundary_start: usize,
    /// First kept index; `[boundary_start, cut_index)` is summarized.
    pub cut_index: usize,
    pub keep_recent_tokens: usize,
    /// Estimated tokens of the whole conversation before compaction.
    pub tokens_before: usize,
    /// Summary text of the latest `compactionSummary`, used to seed an update.
    pub previous_summary: Option<String>,
    /// Chat messages in the summarized slice.
    pub summarized_count: usize,
}

impl CompactionPlan {
    /// Locate the boundary and cut point for `keep_recent_tokens`.
    ///
    /// Fails with `TooFewMessages` when fewer than `min_messages` chat messages
    /// are unsummarized, and with `NothingToCompact` when the slice is empty.
    pub fn prepare(
        messages: &[ConversationMessage],
        keep_recent_tokens: usize,
        min_messages: usize,
    ) -> Result<Self, CompactionError> {
        let boundary_start = find_boundary_start(messages);
        let eligible = count_chat_messages(&messages[boundary_start..]);
        if eligible < min_messages {
            return Err(CompactionError::TooFewMessages {
                found: eligible,
                required: min_messages,
            });
        }

        let cut_index = find_cut_point(messages, boundary_start, keep_recent_tokens);
        if cut_index <= boundary_start {
            return Err(CompactionError::NothingToCompact);
        }

        let previous_summary = boundary_start
            .checked_sub(1)
            .and_then(|index| messages[index].as_compaction_summary())
            .map(|summary| summary.summary.clone());

        let plan = Self {
            boundary_start,
            cut_index,
            keep_recent_tokens,
            tokens_before: estimate_conversation_tokens(messages),
            previous_summary,
            summarized_count: count_chat_messages(&messages[boundary_start..cut_index]),
        };
        debug!(
            boundary_start = plan.boundary_start,
            cut_index = plan.cut_index,
            keep_recent_tokens,
            summarized = plan.summarized_count,
            "compaction plan"
        );
        Ok(plan)
    }

    pub fn to_summarize<'a>(&self, messages: &'a [ConversationMessage]) -> &'a [ConversationMessage] {
        &messages[self.boundary_start..self.cut_index]
    }

    pub fn kept<'a>(&self, messages: &'a [ConversationMessage]) -> &'a [ConversationMessage] {
        &messages[self.cut_index..]
    }

    /// The user prompt this plan sends to the summarizer.
    pub fn prompt(
        &self,
        messages: &[ConversationMessage],
        limits: &SerializeLimits,
        focus: Option<&str>,
    ) -> String {
        let transcript = serialize_conversation(self.to_summarize(messages), limits);
        build_summary_prompt(&transcript, self.previous_summary.as_deref(), focus)
    }

    /// Combine the plan with a finished summary.
    pub fn into_result(
        self,
        messages: &[ConversationMessage],
        summary: String,
        limits: SerializeLimits,
        retried: bool,
    ) -> CompactionResult {
        CompactionResult {
            summary,
            kept_messages: self.kept(messages).to_vec(),
            messages_to_archive: self.to_summarize(messages).to_vec(),
            summarized_count: self.summarized_count,
            boundary_start: self.boundary_start,
            cut_index: self.cut_index,
            keep_recent_tokens: self.keep_recent_tokens,
            tokens_before: self.tokens_before,
            limits,
            retried,
        }
    }
}

/// Output of a successful pass. Feed it to `rewrite_conversation` together with
/// the same message list to get the compacted conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionResult {
    pub summary: String,
    pub kept_messages: Vec<ConversationMessage>,
    pub messages_to_archive: Vec<ConversationMessage>,
    pub summarized_count: usize,
    pub boundary_start: usize,
    pub cut_index: usize,
    pub keep_recent_tokens: usize,
    pub tokens_before: usize,
    pub limits: SerializeLimits,
    /// Whether the overflow retry produced this result.
    pub retried: bool,
}

/// Runs summarization through the host's completion function.
#[derive(Clone)]
pub struct CompactionEngine {
    stream_fn: Arc<dyn StreamFn>,
    api_keys: Arc<dyn ApiKeyResolver>,
    model: ModelInfo,
    settings: CompactionSettings,
}

impl CompactionEngine {
    pub fn new(
        stream_fn: Arc<dyn StreamFn>,
        api_keys: Arc<dyn ApiKeyResolver>,
        model: ModelInfo,
        settings: CompactionSettings,
    ) -> Self {
        Self {
            stream_fn,
            api_keys,
            model,
            settings,
        }
    }

    pub fn model(&self) -> &ModelInfo {
        &self.model
    }

    pub fn settings(&self) -> &CompactionSettings {
        &self.settings
    }

    /// Plan for the first attempt.
    pub fn plan(&self, messages: &[ConversationMessage]) -> Result<CompactionPlan, CompactionError> {
        CompactionPlan::prepare(
            messages,
            self.settings.initial_keep_tokens(&self.model),
            self.settings.min_messages,
        )
    }

    /// Summarize the unsummarized head of `messages`.
    ///
    /// A "prompt too long" provider failure is retried exactly once with the
    /// aggressive limits and a doubled keep budget. Any other failure, or a
    /// second failure, is returned as is.
    pub async fn compact(
        &self,
        messages: &[ConversationMessage],
        options: &CompactOptions,
    ) -> Result<CompactionResult, CompactionError> {
        let plan = self.plan(messages)?;

        let api_key = self
            .api_keys
            .get_api_key(&self.model.provider)
            .await
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| CompactionError::MissingApiKey {
                provider: self.model.provider.clone(),
            })?;

        let first_keep = plan.keep_recent_tokens;
        let first = self
            .attempt(messages, plan, self.settings.limits, false, &api_key, options)
            .await;

        let err = match first {
            Ok(result) => return Ok(result),
            Err(err) if err.is_context_overflow() => err,
            Err(err) => return Err(err),
        };

        let retry_keep = self.settings.retry_keep_tokens(&self.model, first_keep);
        warn!(
            error = %err,
            keep_recent_tokens = retry_keep,
            "summarization prompt too long, retrying with aggressive limits"
        );
        let plan = match CompactionPlan::prepare(messages, retry_keep, self.settings.min_messages) {
            Ok(plan) => plan,
            // The overflow is the real failure; a wider keep budget leaving
            // nothing to summarize must not turn it into a skip.
            Err(retry_err) if retry_err.is_insufficient_input() => return Err(err),
            Err(retry_err) => return Err(retry_err),
        };
        self.attempt(
            messages,
            plan,
            self.settings.aggressive_limits,
            true,
            &api_key,
            options,
        )
        .await
    }

    async fn attempt(
        &self,
        messages: &[ConversationMessage],
        plan: CompactionPlan,
        limits: SerializeLimits,
        retried: bool,
        api_key: &str,
        options: &CompactOptions,
    ) -> Result<CompactionResult, CompactionError> {
        let prompt = plan.prompt(messages, &limits, options.focus.as_deref());
        let summary = self.summarize(prompt, api_key, options).await?;
        info!(
            summarized = plan.summarized_count,
            kept = messages.len() - plan.cut_index,
            retried,
            "conversation summarized"
        );
        Ok(plan.into_result(messages, summary, limits, retried))
    }

    async fn summarize(
        &self,
        prompt: String,
        api_key: &str,
        options: &CompactOptions,
    ) -> Result<String, CompactionError> {
        let context = CompletionContext {
            system_prompt: SUMMARIZATION_SYSTEM_PROMPT.to_string(),
            messages: vec![ConversationMessage::user(prompt)],
        };
        let call_options = CompletionOptions {
            api_key: api_key.to_string(),
            session_id: options.session_id.clone(),
            max_tokens: self.settings.summary_max_tokens(&self.model),
            reasoning: Some(ReasoningEffort::High),
            temperature: None,
            cancel: options.cancel.clone(),
        };

        let handle = self.stream_fn.stream(&self.model, context, call_options);
        let outcome = match &options.cancel {
            Some(cancel) => tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CompactionError::Aborted),
                outcome = handle.result() => outcome,
            },
            None => handle.result().await,
        };

        // Transport errors are classified like provider errors so an overflow
        // reported at that level still triggers the retry.
        let result = outcome.map_err(|err| CompactionError::Provider {
            message: format!("{:#}", err),
        })?;

        match result.stop_reason {
            StopReason::Error => {
                return Err(CompactionError::Provider {
                    message: result
                        .error_message
                        .unwrap_or_else(|| "Summarization failed".to_string()),
                });
            }
            StopReason::Aborted => return Err(CompactionError::Aborted),
            StopReason::Stop | StopReason::Length | StopReason::ToolUse => {}
        }

        let summary = result.text_content().trim().to_string();
        if summary.is_empty() {
            return Err(CompactionError::EmptySummary);
        }
        let missing = missing_sections(&summary);
        if !missing.is_empty() {
            warn!(?missing, "summary is missing expected sections");
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellpilot_common::{StaticApiKeys, StreamHandle, StreamResult};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    struct Call {
        prompt: String,
        max_tokens: u32,
        reasoning: Option<ReasoningEffort>,
    }

    /// Replays canned results and records every request.
    #[derive(Default)]
    struct Scripted {
        replies: Mutex<VecDeque<StreamResult>>,
        calls: Mutex<Vec<Call>>,
    }

    impl Scripted {
        fn new(replies: Vec<StreamResult>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl StreamFn for Scripted {
        fn stream(
            &self,
            _model: &ModelInfo,
            context: CompletionContext,
            options: CompletionOptions,
        ) -> StreamHandle {
            let ConversationMessage::User(user) = &context.messages[0] else {
                panic!("summarizer expects a single user message");
            };
            self.calls.lock().unwrap().push(Call {
                prompt: user.content.text(),
                max_tokens: options.max_tokens,
                reasoning: options.reasoning,
            });
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| StreamResult::error("no scripted reply"));
            StreamHandle::ready(Ok(reply))
        }
    }

    fn keys() -> Arc<StaticApiKeys> {
        Arc::new(StaticApiKeys::new().with_key("anthropic", "sk-test"))
    }

    fn model() -> ModelInfo {
        ModelInfo::new("anthropic", "claude-sonnet", 200_000, 64_000)
    }

    fn settings(keep: usize) -> CompactionSettings {
        CompactionSettings {
            keep_recent_tokens: keep,
            ..CompactionSettings::default()
        }
    }

    fn turns(pairs: usize, tokens: usize) -> Vec<ConversationMessage> {
        (0..pairs)
            .flat_map(|i| {
                [
                    ConversationMessage::user(format!("q{i}:{}", "u".repeat(tokens * 4 - 3))),
                    ConversationMessage::assistant_text(format!(
                        "a{i}:{}",
                        "a".repeat(tokens * 4 - 3)
                    )),
                ]
            })
            .collect()
    }

    #[test]
    fn test_plan_counts_only_chat_messages() {
        let mut messages = turns(3, 100);
        messages.insert(2, ConversationMessage::tool_result("c1", "read", "r", false));
        messages.insert(3, ConversationMessage::artifact("a.html", "x"));
        let plan = CompactionPlan::prepare(&messages, 200, 4).unwrap();
        assert_eq!(plan.boundary_start, 0);
        assert_eq!(plan.cut_index, 6);
        assert_eq!(plan.summarized_count, 4);
        assert_eq!(plan.previous_summary, None);
    }

    #[test]
    fn test_plan_reads_previous_summary() {
        let mut messages = vec![ConversationMessage::compaction_summary("## Goal\nold", 4)];
        messages.extend(turns(3, 100));
        let plan = CompactionPlan::prepare(&messages, 200, 4).unwrap();
        assert_eq!(plan.boundary_start, 1);
        assert_eq!(plan.previous_summary.as_deref(), Some("## Goal\nold"));
        assert!(plan.prompt(&messages, &SerializeLimits::DEFAULT, None).contains("<previous-summary>"));
    }

    #[test]
    fn test_plan_nothing_to_compact() {
        let messages = turns(2, 10);
        assert!(matches!(
            CompactionPlan::prepare(&messages, 10_000, 4),
            Err(CompactionError::NothingToCompact)
        ));
    }

    #[tokio::test]
    async fn test_compact_calls_model_with_conservative_budget() {
        let stream = Scripted::new(vec![StreamResult::text("## Goal\nBuild the budget")]);
        let engine = CompactionEngine::new(stream.clone(), keys(), model(), settings(200));
        let messages = turns(3, 100);

        let result = engine
            .compact(&messages, &CompactOptions::default())
            .await
            .unwrap();
        assert_eq!(result.summary, "## Goal\nBuild the budget");
        assert_eq!(result.summarized_count, 4);
        assert_eq!(result.kept_messages, messages[4..].to_vec());
        assert_eq!(result.messages_to_archive, messages[..4].to_vec());
        assert!(!result.retried);

        let calls = stream.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].max_tokens, 13_107);
        assert_eq!(calls[0].reasoning, Some(ReasoningEffort::High));
        assert!(calls[0].prompt.contains("[User]: q0:"));
        assert!(!calls[0].prompt.contains("q2:"));
    }

    #[tokio::test]
    async fn test_overflow_kept_when_retry_budget_covers_everything() {
        let stream = Scripted::new(vec![StreamResult::error(
            "prompt is too long: 210000 tokens > 200000 maximum",
        )]);
        let engine = CompactionEngine::new(stream.clone(), keys(), model(), settings(150));
        let messages = turns(3, 50);

        let err = engine
            .compact(&messages, &CompactOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_context_overflow(), "got {err:?}");
        assert!(!err.is_insufficient_input());
        assert_eq!(stream.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_api_key_stops_before_call() {
        let stream = Scripted::new(vec![StreamResult::text("## Goal")]);
        let engine = CompactionEngine::new(
            stream.clone(),
            Arc::new(StaticApiKeys::new()),
            model(),
            settings(200),
        );
        let err = engine
            .compact(&turns(3, 100), &CompactOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CompactionError::MissingApiKey { ref provider } if provider == "anthropic"));
        assert!(stream.calls().is_empty());
    }

    #[tokio::test]
    async fn test_provider_errors_map_to_variants() {
        let messages = turns(3, 100);

        let stream = Scripted::new(vec![StreamResult::error("401 invalid x-api-key")]);
        let engine = CompactionEngine::new(stream.clone(), keys(), model(), settings(200));
        match engine.compact(&messages, &CompactOptions::default()).await {
            Err(CompactionError::Provider { message }) => assert_eq!(message, "401 invalid x-api-key"),
            other => panic!("Expected Provider error, got {:?}", other),
        }
        assert_eq!(stream.calls().len(), 1);

        let stream = Scripted::new(vec![StreamResult::aborted()]);
        let engine = CompactionEngine::new(stream, keys(), model(), settings(200));
        assert!(matches!(
            engine.compact(&messages, &CompactOptions::default()).await,
            Err(CompactionError::Aborted)
        ));

        let stream = Scripted::new(vec![StreamResult::text("   \n")]);
        let engine = CompactionEngine::new(stream, keys(), model(), settings(200));
        assert!(matches!(
            engine.compact(&messages, &CompactOptions::default()).await,
            Err(CompactionError::EmptySummary)
        ));
    }

    #[tokio::test]
    async fn test_overflow_retries_once_with_aggressive_limits() {
        let stream = Scripted::new(vec![
            StreamResult::error("prompt is too long: 250000 tokens > 200000 maximum"),
            StreamResult::text("## Goal\nretry"),
        ]);
        let engine = CompactionEngine::new(stream.clone(), keys(), model(), settings(100));
        let messages = turns(4, 100);

        let result = engine
            .compact(&messages, &CompactOptions::default())
            .await
            .unwrap();
        assert!(result.retried);
        assert_eq!(result.keep_recent_tokens, 200);
        assert_eq!(result.limits, SerializeLimits::AGGRESSIVE);
        assert_eq!(result.cut_index, 6);
        assert_eq!(stream.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_reply_is_aborted() {
        struct Never;
        impl StreamFn for Never {
            fn stream(
                &self,
                _model: &ModelInfo,
                _context: CompletionContext,
                _options: CompletionOptions,
            ) -> StreamHandle {
                StreamHandle::new(futures::future::pending())
            }
        }

        let cancel = CancellationToken::new();
        cancel.cancel();
        let engine = CompactionEngine::new(Arc::new(Never), keys(), model(), settings(200));
        let options = CompactOptions {
            cancel: Some(cancel),
            ..CompactOptions::default()
        };
        assert!(matches!(
            engine.compact(&turns(3, 100), &options).await,
            Err(CompactionError::Aborted)
        ));
    }
}
