//! Compaction settings and context limit parsing.

use std::str::FromStr;

use anyhow::{Context, Result};
use cellpilot_common::ModelInfo;

use super::serialize::SerializeLimits;

/// How much of the usable window the live conversation may fill before
/// compaction is recommended.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextLimit {
    /// Percentage of `context_window - reserve_tokens` (e.g., 80%)
    Percentage(f32),
    /// Absolute token count
    Absolute(usize),
}

impl ContextLimit {
    /// Effective token limit given the usable window.
    pub fn effective_limit(&self, available_tokens: usize) -> usize {
        match self {
            ContextLimit::Percentage(pct) => ((available_tokens as f32) * (*pct / 100.0)) as usize,
            ContextLimit::Absolute(tokens) => *tokens,
        }
    }

    pub fn is_percentage(&self) -> bool {
        matches!(self, ContextLimit::Percentage(_))
    }
}

impl Default for ContextLimit {
    fn default() -> Self {
        ContextLimit::Percentage(80.0)
    }
}

impl std::fmt::Display for ContextLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextLimit::Percentage(pct) => write!(f, "{}%", pct),
            ContextLimit::Absolute(tokens) => write!(f, "{}", tokens),
        }
    }
}

impl FromStr for ContextLimit {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_context_limit(s)
    }
}

/// Parse "80%" or "120000".
pub fn parse_context_limit(s: &str) -> Result<ContextLimit> {
    let s = s.trim();

    if s.is_empty() {
        anyhow::bail!("Context limit cannot be empty");
    }

    if let Some(num_str) = s.strip_suffix('%') {
        let pct: f32 = num_str
            .trim()
            .parse()
            .with_context(|| format!("Invalid percentage in context limit: {}", s))?;

        if pct <= 0.0 || pct > 100.0 {
            anyhow::bail!(
                "Context limit percentage must be between 0 and 100, got {}",
                pct
            );
        }

        Ok(ContextLimit::Percentage(pct))
    } else {
        let tokens: usize = s
            .parse()
            .with_context(|| format!("Invalid absolute context limit: {}", s))?;

        if tokens == 0 {
            anyhow::bail!("Context limit cannot be zero");
        }

        Ok(ContextLimit::Absolute(tokens))
    }
}

/// Resolved compaction knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionSettings {
    /// Tokens held back from the window for the model's next response.
    pub reserve_tokens: usize,
    /// Tokens of recent conversation kept verbatim.
    pub keep_recent_tokens: usize,
    /// Fewer unsummarized chat messages than this refuses to compact.
    pub min_messages: usize,
    pub context_limit: ContextLimit,
    /// Whether policy-driven compaction may run when the limit is crossed.
    pub auto_compact: bool,
    pub limits: SerializeLimits,
    pub aggressive_limits: SerializeLimits,
}

impl Default for CompactionSettings {
    fn default() -> Self {
        Self {
            reserve_tokens: 16_384,
            keep_recent_tokens: 20_000,
            min_messages: 4,
            context_limit: ContextLimit::default(),
            auto_compact: false,
            limits: SerializeLimits::DEFAULT,
            aggressive_limits: SerializeLimits::AGGRESSIVE,
        }
    }
}

impl CompactionSettings {
    /// Window left once the response reserve is set aside.
    pub fn available_tokens(&self, model: &ModelInfo) -> usize {
        (model.context_window as usize).saturating_sub(self.reserve_tokens)
    }

    /// Keep budget for the first attempt, never above the usable window.
    pub fn initial_keep_tokens(&self, model: &ModelInfo) -> usize {
        self.keep_recent_tokens
            .min(self.available_tokens(model))
            .max(1)
    }

    /// Keep budget for the overflow retry: doubled, capped at the full window.
    pub fn retry_keep_tokens(&self, model: &ModelInfo, first_keep: usize) -> usize {
        (model.context_window as usize).min(first_keep.saturating_mul(2))
    }

    /// Output budget for the summarization call.
    pub fn summary_max_tokens(&self, model: &ModelInfo) -> u32 {
        let reserve_cap = u32::try_from(self.reserve_tokens * 4 / 5).unwrap_or(u32::MAX);
        model.max_tokens.min(reserve_cap).max(super::MIN_SUMMARY_TOKENS)
    }
}
