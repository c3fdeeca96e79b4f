//! Configuration for cellpilot.
//!
//! Settings are read from `.cellpilot/cellpilot.toml` and layered
//! file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [model]
//! provider = "anthropic"
//! id = "claude-sonnet-4-5"
//! context_window = 200000
//! max_tokens = 64000
//!
//! [compaction]
//! reserve_tokens = 16384
//! keep_recent_tokens = 20000
//! min_messages = 4
//! context_limit = "80%"
//! auto_compact = false
//!
//! [compaction.limits]
//! max_tool_result_chars = 3000
//!
//! [compaction.aggressive_limits]
//! max_user_chars = 1500
//!
//! [coordinator]
//! max_queue_depth = 32
//! ```
//!
//! # Environment
//!
//! - `CELLPILOT_CONTEXT_LIMIT` overrides `compaction.context_limit`
//! - `CELLPILOT_RESERVE_TOKENS` overrides `compaction.reserve_tokens`

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cellpilot_common::ModelInfo;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::compaction::{CompactionSettings, SerializeLimits, parse_context_limit};
use crate::coordinator::CoordinatorConfig;

pub const CONFIG_DIR: &str = ".cellpilot";
pub const CONFIG_FILE: &str = "cellpilot.toml";

pub const ENV_CONTEXT_LIMIT: &str = "CELLPILOT_CONTEXT_LIMIT";
pub const ENV_RESERVE_TOKENS: &str = "CELLPILOT_RESERVE_TOKENS";

/// Model used for summarization and budget math.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSection {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model_id")]
    pub id: String,
    #[serde(default = "default_context_window")]
    pub context_window: u32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_provider() -> String {
    "anthropic".to_string()
}

fn default_model_id() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_context_window() -> u32 {
    200_000
}

fn default_max_tokens() -> u32 {
    64_000
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            id: default_model_id(),
            context_window: default_context_window(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Per-role caps; unset fields fall back to the preset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LimitsSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_user_chars: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_assistant_chars: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tool_result_chars: Option<usize>,
}

impl LimitsSection {
    pub fn resolve(&self, preset: SerializeLimits) -> SerializeLimits {
        SerializeLimits {
            max_user_chars: self.max_user_chars.unwrap_or(preset.max_user_chars),
            max_assistant_chars: self
                .max_assistant_chars
                .unwrap_or(preset.max_assistant_chars),
            max_tool_result_chars: self
                .max_tool_result_chars
                .unwrap_or(preset.max_tool_result_chars),
        }
    }

    fn zero_fields(&self) -> Vec<&'static str> {
        [
            ("max_user_chars", self.max_user_chars),
            ("max_assistant_chars", self.max_assistant_chars),
            ("max_tool_result_chars", self.max_tool_result_chars),
        ]
        .into_iter()
        .filter(|(_, value)| *value == Some(0))
        .map(|(name, _)| name)
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionSection {
    #[serde(default = "default_reserve_tokens")]
    pub reserve_tokens: usize,
    #[serde(default = "default_keep_recent_tokens")]
    pub keep_recent_tokens: usize,
    #[serde(default = "default_min_messages")]
    pub min_messages: usize,
    /// "80%" of the usable window, or an absolute token count.
    #[serde(default = "default_context_limit")]
    pub context_limit: String,
    #[serde(default)]
    pub auto_compact: bool,
    #[serde(default)]
    pub limits: LimitsSection,
    #[serde(default)]
    pub aggressive_limits: LimitsSection,
}

fn default_reserve_tokens() -> usize {
    16_384
}

fn default_keep_recent_tokens() -> usize {
    20_000
}

fn default_min_messages() -> usize {
    4
}

fn default_context_limit() -> String {
    "80%".to_string()
}

impl Default for CompactionSection {
    fn default() -> Self {
        Self {
            reserve_tokens: default_reserve_tokens(),
            keep_recent_tokens: default_keep_recent_tokens(),
            min_messages: default_min_messages(),
            context_limit: default_context_limit(),
            auto_compact: false,
            limits: LimitsSection::default(),
            aggressive_limits: LimitsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorSection {
    /// Unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_queue_depth: Option<usize>,
}

/// The complete cellpilot.toml configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellpilotToml {
    #[serde(default)]
    pub model: ModelSection,
    #[serde(default)]
    pub compaction: CompactionSection,
    #[serde(default)]
    pub coordinator: CoordinatorSection,
}

impl CellpilotToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse cellpilot.toml")
    }

    /// Load `cellpilot.toml` from `config_dir`, or defaults if it is absent.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize cellpilot.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(limit) = lookup(ENV_CONTEXT_LIMIT).filter(|v| !v.trim().is_empty()) {
            self.compaction.context_limit = limit.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_RESERVE_TOKENS) {
            match raw.trim().parse::<usize>() {
                Ok(tokens) => self.compaction.reserve_tokens = tokens,
                Err(_) => warn!(value = %raw, "ignoring invalid {}", ENV_RESERVE_TOKENS),
            }
        }
    }

    pub fn model_info(&self) -> ModelInfo {
        ModelInfo::new(
            self.model.provider.clone(),
            self.model.id.clone(),
            self.model.context_window,
            self.model.max_tokens,
        )
    }

    pub fn compaction_settings(&self) -> Result<CompactionSettings> {
        let section = &self.compaction;
        Ok(CompactionSettings {
            reserve_tokens: section.reserve_tokens,
            keep_recent_tokens: section.keep_recent_tokens,
            min_messages: section.min_messages,
            context_limit: parse_context_limit(&section.context_limit)?,
            auto_compact: section.auto_compact,
            limits: section.limits.resolve(SerializeLimits::DEFAULT),
            aggressive_limits: section.aggressive_limits.resolve(SerializeLimits::AGGRESSIVE),
        })
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            max_queue_depth: self.coordinator.max_queue_depth,
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let compaction = &self.compaction;

        if let Err(err) = parse_context_limit(&compaction.context_limit) {
            warnings.push(format!(
                "Invalid context_limit '{}': {}",
                compaction.context_limit, err
            ));
        }

        if compaction.reserve_tokens >= self.model.context_window as usize {
            warnings.push(format!(
                "reserve_tokens ({}) leaves no room in context_window ({})",
                compaction.reserve_tokens, self.model.context_window
            ));
        }

        if compaction.keep_recent_tokens == 0 {
            warnings.push("keep_recent_tokens must be greater than 0".to_string());
        }

        if compaction.min_messages == 0 {
            warnings.push("min_messages must be at least 1".to_string());
        }

        if self.model.max_tokens == 0 {
            warnings.push("model.max_tokens must be greater than 0".to_string());
        }

        for (section, limits) in [
            ("limits", &compaction.limits),
            ("aggressive_limits", &compaction.aggressive_limits),
        ] {
            for field in limits.zero_fields() {
                warnings.push(format!("compaction.{}.{} must be greater than 0", section, field));
            }
        }

        if self.coordinator.max_queue_depth == Some(0) {
            warnings.push(
                "coordinator.max_queue_depth = 0 rejects every write that has to wait".to_string(),
            );
        }

        warnings
    }
}

/// Configuration resolved for one project directory.
#[derive(Debug, Clone)]
pub struct CellpilotConfig {
    pub project_dir: PathBuf,
    /// Path to the .cellpilot directory
    pub config_dir: PathBuf,
    /// File settings with environment and CLI overrides applied
    pub toml: CellpilotToml,
}

impl CellpilotConfig {
    /// Load the project's configuration with process environment overrides.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        Self::with_env(project_dir, |key| std::env::var(key).ok())
    }

    /// Like [`new`](Self::new) with an explicit environment lookup.
    pub fn with_env<F>(project_dir: PathBuf, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let config_dir = project_dir.join(CONFIG_DIR);
        let mut toml = CellpilotToml::load_or_default(&config_dir)?;
        toml.apply_env_with(lookup);

        Ok(Self {
            project_dir,
            config_dir,
            toml,
        })
    }

    /// Apply CLI overrides (highest precedence).
    pub fn with_cli_args(mut self, context_limit: Option<String>) -> Self {
        if let Some(limit) = context_limit {
            self.toml.compaction.context_limit = limit;
        }
        self
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }

    pub fn model_info(&self) -> ModelInfo {
        self.toml.model_info()
    }

    pub fn compaction_settings(&self) -> Result<CompactionSettings> {
        self.toml.compaction_settings()
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        self.toml.coordinator_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compaction::ContextLimit;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let toml = CellpilotToml::parse("").unwrap();
        assert_eq!(toml, CellpilotToml::default());
        assert_eq!(toml.model.context_window, 200_000);

        let settings = toml.compaction_settings().unwrap();
        assert_eq!(settings, CompactionSettings::default());
        assert!(toml.validate().is_empty());
        assert_eq!(toml.coordinator_config().max_queue_depth, None);
    }

    #[test]
    fn test_parse_sections() {
        let content = r#"
[model]
provider = "openai"
id = "gpt-5"
context_window = 128000

[compaction]
reserve_tokens = 8000
context_limit = "90000"

[compaction.limits]
max_tool_result_chars = 3000

[compaction.aggressive_limits]
max_user_chars = 1500

[coordinator]
max_queue_depth = 16
"#;
        let toml = CellpilotToml::parse(content).unwrap();
        let model = toml.model_info();
        assert_eq!(model.provider, "openai");
        assert_eq!(model.context_window, 128_000);
        assert_eq!(model.max_tokens, 64_000);

        let settings = toml.compaction_settings().unwrap();
        assert_eq!(settings.reserve_tokens, 8000);
        assert_eq!(settings.context_limit, ContextLimit::Absolute(90_000));
        assert_eq!(settings.limits.max_tool_result_chars, 3000);
        assert_eq!(settings.limits.max_user_chars, 8000);
        assert_eq!(settings.aggressive_limits.max_user_chars, 1500);
        assert_eq!(settings.aggressive_limits.max_tool_result_chars, 800);
        assert_eq!(toml.coordinator_config().max_queue_depth, Some(16));
    }

    #[test]
    fn test_parse_rejects_bad_types() {
        assert!(CellpilotToml::parse("[compaction]\nreserve_tokens = \"lots\"").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_CONTEXT_LIMIT, " 60% "),
            (ENV_RESERVE_TOKENS, "4096"),
        ]
        .into_iter()
        .collect();
        let mut toml = CellpilotToml::default();
        toml.apply_env_with(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(toml.compaction.context_limit, "60%");
        assert_eq!(toml.compaction.reserve_tokens, 4096);
    }

    #[test]
    fn test_invalid_env_reserve_is_ignored() {
        let mut toml = CellpilotToml::default();
        toml.apply_env_with(|key| (key == ENV_RESERVE_TOKENS).then(|| "many".to_string()));
        assert_eq!(toml.compaction.reserve_tokens, 16_384);
    }

    #[test]
    fn test_validate_warnings() {
        let content = r#"
[model]
context_window = 10000

[compaction]
reserve_tokens = 10000
context_limit = "invalid"
min_messages = 0

[compaction.limits]
max_user_chars = 0

[coordinator]
max_queue_depth = 0
"#;
        let toml = CellpilotToml::parse(content).unwrap();
        let warnings = toml.validate();
        assert_eq!(warnings.len(), 5, "{:?}", warnings);
        assert!(warnings[0].contains("Invalid context_limit"));
        assert!(warnings.iter().any(|w| w.contains("compaction.limits.max_user_chars")));
        assert!(toml.compaction_settings().is_err());
    }

    #[test]
    fn test_config_layering() {
        let dir = tempdir().unwrap();
        let config_dir = dir.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join(CONFIG_FILE),
            "[compaction]\ncontext_limit = \"70%\"\nreserve_tokens = 1000\n",
        )
        .unwrap();

        let from_file = CellpilotConfig::with_env(dir.path().to_path_buf(), |_| None).unwrap();
        assert_eq!(from_file.toml.compaction.context_limit, "70%");

        let from_env = CellpilotConfig::with_env(dir.path().to_path_buf(), |key| {
            (key == ENV_CONTEXT_LIMIT).then(|| "50%".to_string())
        })
        .unwrap();
        assert_eq!(from_env.toml.compaction.context_limit, "50%");
        assert_eq!(from_env.toml.compaction.reserve_tokens, 1000);

        let from_cli = from_env.with_cli_args(Some("40%".to_string()));
        assert_eq!(
            from_cli.compaction_settings().unwrap().context_limit,
            ContextLimit::Percentage(40.0)
        );
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut toml = CellpilotToml::default();
        toml.coordinator.max_queue_depth = Some(8);
        toml.compaction.limits.max_user_chars = Some(5000);
        toml.save(&path).unwrap();

        assert_eq!(CellpilotToml::load(&path).unwrap(), toml);
    }

    #[test]
    fn test_missing_project_dir_fails() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(CellpilotConfig::with_env(missing, |_| None).is_err());
    }
}
