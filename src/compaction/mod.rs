//! Conversation Compaction
//!
//! Replaces the older part of a conversation with an LLM-written summary so the
//! live context fits the model window again.
//!
//! ## Pass outline
//!
//! 1. Find the boundary: everything before the latest `compactionSummary` is
//!    frozen and never summarized again.
//! 2. Walk back from the end until `keep_recent_tokens` is reached; that index is
//!    the cut point. A kept tail never opens with a tool result.
//! 3. Render `[boundary, cut)` as a plain transcript and ask the model for a
//!    structured summary, seeded with the previous summary if there is one.
//! 4. Rewrite the conversation as `[archive, summary, ...kept]`.
//!
//! A "prompt too long" failure is retried once with tighter truncation and a
//! doubled keep budget.
//!
//! ## Configuration
//!
//! ```toml
//! [compaction]
//! reserve_tokens = 16384
//! keep_recent_tokens = 20000
//! min_messages = 4
//! context_limit = "80%"
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use cellpilot::compaction::{CompactOptions, CompactionEngine, rewrite_conversation};
//!
//! let engine = CompactionEngine::new(stream_fn, api_keys, model, settings);
//! let result = engine.compact(&messages, &CompactOptions::default()).await?;
//! let messages = rewrite_conversation(&messages, &result);
//! ```

mod config;
mod cut_point;
mod engine;
mod estimator;
mod manager;
mod prompt;
mod rewrite;
mod serialize;
mod tracker;

pub use config::{CompactionSettings, ContextLimit, parse_context_limit};
pub use cut_point::{find_boundary_start, find_cut_point};
pub use engine::{CompactOptions, CompactionEngine, CompactionPlan, CompactionResult};
pub use estimator::{
    chars_to_tokens, count_chat_messages, estimate_chars, estimate_conversation_tokens,
    estimate_tokens,
};
pub use manager::{CompactReport, CompactStatus, CompactionManager};
pub use prompt::{
    REQUIRED_SECTIONS, SUMMARIZATION_SYSTEM_PROMPT, build_summary_prompt, missing_sections,
};
pub use rewrite::{merge_archive, rewrite_conversation};
pub use serialize::{SerializeLimits, TRUNCATION_MARKER, serialize_conversation, truncate_middle};
pub use tracker::ContextUsage;

/// Characters per estimated token.
pub const CHARS_PER_TOKEN: usize = 4;

/// Flat character charge for an image block (about 1200 tokens).
pub const IMAGE_CHAR_ESTIMATE: usize = 4800;

/// Lower bound on the summarization call's output budget.
pub const MIN_SUMMARY_TOKENS: u32 = 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_constants() {
        assert_eq!(IMAGE_CHAR_ESTIMATE / CHARS_PER_TOKEN, 1200);
        assert!(MIN_SUMMARY_TOKENS > 0);
    }
}
