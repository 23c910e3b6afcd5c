//! Configuration loading, validation, and management for turnloop.
//!
//! Loads configuration from `~/.turnloop/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use turnloop_core::provider::GenerationConfig;

/// The root configuration structure.
///
/// Maps directly to `~/.turnloop/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopSettings {
    /// Model calls allowed per loop invocation (provider retries excluded)
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Generation defaults handed to the model client
    #[serde(default)]
    pub generation: GenerationSettings,

    /// Provider retry policy
    #[serde(default)]
    pub retry: RetrySettings,

    /// Sentinel tool names that end a loop
    #[serde(default)]
    pub completion: CompletionSettings,

    /// What counts as an empty tool result
    #[serde(default)]
    pub empty_result: EmptyResultSettings,

    /// Tool execution settings
    #[serde(default)]
    pub tools: ToolSettings,
}

fn default_max_iterations() -> u32 {
    25
}
fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GenerationSettings {
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_endpoint: Option<String>,

    #[serde(default)]
    pub tool_context_id: String,

    /// Free-form provider parameters (temperature, max_tokens, ...)
    #[serde(default)]
    pub extra_params: HashMap<String, serde_json::Value>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            api_endpoint: None,
            tool_context_id: String::new(),
            extra_params: HashMap::new(),
        }
    }
}

impl std::fmt::Debug for GenerationSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationSettings")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &redact(&self.api_key))
            .field("api_endpoint", &self.api_endpoint)
            .field("tool_context_id", &self.tool_context_id)
            .field("extra_params", &self.extra_params)
            .finish()
    }
}

impl GenerationSettings {
    /// Build the immutable per-loop generation config.
    pub fn to_generation_config(&self) -> GenerationConfig {
        let mut extra_params = serde_json::Map::new();
        let mut keys: Vec<_> = self.extra_params.keys().collect();
        keys.sort();
        for key in keys {
            extra_params.insert(key.clone(), self.extra_params[key].clone());
        }
        GenerationConfig {
            provider: self.provider.clone(),
            model_name: self.model.clone(),
            api_key: self.api_key.clone(),
            api_endpoint: self.api_endpoint.clone(),
            tool_context_id: self.tool_context_id.clone(),
            extra_params,
        }
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Retries after a null provider response (the first attempt is not counted)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before retry `n` is `base_delay_ms * n`
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Pause before giving up on a reset connection
    #[serde(default = "default_transport_pause_ms")]
    pub transport_pause_ms: u64,

    /// Substrings that mark a provider error as a null structured response
    #[serde(default = "default_null_signatures")]
    pub null_response_signatures: Vec<String>,
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    2000
}
fn default_transport_pause_ms() -> u64 {
    300
}
fn default_null_signatures() -> Vec<String> {
    vec![
        "\"choices\":null".into(),
        "choices is null".into(),
        "null choices".into(),
    ]
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            transport_pause_ms: default_transport_pause_ms(),
            null_response_signatures: default_null_signatures(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionSettings {
    /// Tools whose mere presence ends the loop before anything executes
    #[serde(default = "default_terminating_tools")]
    pub terminating_tools: Vec<String>,

    /// Tools that are executed once and then end the loop
    #[serde(default = "default_modification_tools")]
    pub modification_complete_tools: Vec<String>,
}

fn default_terminating_tools() -> Vec<String> {
    vec!["mark_generation_complete".into()]
}
fn default_modification_tools() -> Vec<String> {
    vec!["mark_modification_complete".into()]
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            terminating_tools: default_terminating_tools(),
            modification_complete_tools: default_modification_tools(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmptyResultSettings {
    /// Markers that make any tool's result count as "no data"
    #[serde(default = "default_empty_markers")]
    pub markers: Vec<String>,

    /// Extra markers for specific tools (tool name → markers)
    #[serde(default)]
    pub per_tool: HashMap<String, Vec<String>>,
}

fn default_empty_markers() -> Vec<String> {
    vec!["\"nodes\":[]".into()]
}

impl Default for EmptyResultSettings {
    fn default() -> Self {
        Self {
            markers: default_empty_markers(),
            per_tool: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSettings {
    /// Per-tool execution timeout
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,

    /// Stop a batch at the first failing tool instead of reporting the error inline.
    ///
    /// Inline errors are ordinary results to the loop, so a failing tool can
    /// only fail the first turn when this is on.
    #[serde(default)]
    pub fail_fast: bool,
}

fn default_tool_timeout() -> u64 {
    120
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_tool_timeout(),
            fail_fast: false,
        }
    }
}

impl LoopSettings {
    /// Load configuration from the default path (~/.turnloop/config.toml).
    ///
    /// Environment variables override file values:
    /// - `TURNLOOP_MAX_ITERATIONS`
    /// - `TURNLOOP_PROVIDER`, `TURNLOOP_MODEL`, `TURNLOOP_API_ENDPOINT`
    /// - `TURNLOOP_API_KEY` (falls back to `OPENROUTER_API_KEY`, `OPENAI_API_KEY`)
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env_overrides(
        &mut self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(raw) = env("TURNLOOP_MAX_ITERATIONS") {
            self.max_iterations = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "TURNLOOP_MAX_ITERATIONS must be a positive integer, got '{raw}'"
                ))
            })?;
        }
        if let Some(provider) = env("TURNLOOP_PROVIDER") {
            self.generation.provider = provider;
        }
        if let Some(model) = env("TURNLOOP_MODEL") {
            self.generation.model = model;
        }
        if let Some(endpoint) = env("TURNLOOP_API_ENDPOINT") {
            self.generation.api_endpoint = Some(endpoint);
        }
        if self.generation.api_key.is_none() {
            self.generation.api_key = env("TURNLOOP_API_KEY")
                .or_else(|| env("OPENROUTER_API_KEY"))
                .or_else(|| env("OPENAI_API_KEY"));
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".turnloop")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "max_iterations must be at least 1".into(),
            ));
        }

        if self.retry.max_retries > 10 {
            return Err(ConfigError::ValidationError(
                "retry.max_retries must be 10 or less".into(),
            ));
        }

        let sentinels = self
            .completion
            .terminating_tools
            .iter()
            .chain(&self.completion.modification_complete_tools);
        for name in sentinels {
            if name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "completion tool names must not be empty".into(),
                ));
            }
        }

        if self.tools.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "tools.timeout_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            generation: GenerationSettings::default(),
            retry: RetrySettings::default(),
            completion: CompletionSettings::default(),
            empty_result: EmptyResultSettings::default(),
            tools: ToolSettings::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for turnloop_core::Error {
    fn from(e: ConfigError) -> Self {
        turnloop_core::Error::Config {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = LoopSettings::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_iterations, 25);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay_ms, 2000);
        assert_eq!(config.retry.transport_pause_ms, 300);
        assert_eq!(config.completion.terminating_tools, ["mark_generation_complete"]);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = LoopSettings::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: LoopSettings = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.max_iterations, config.max_iterations);
        assert_eq!(parsed.empty_result.markers, config.empty_result.markers);
    }

    #[test]
    fn zero_iterations_rejected() {
        let config = LoopSettings {
            max_iterations: 0,
            ..LoopSettings::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn blank_sentinel_rejected() {
        let mut config = LoopSettings::default();
        config.completion.terminating_tools.push("  ".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = LoopSettings::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.generation.provider, "openrouter");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
max_iterations = 8

[retry]
max_retries = 2

[empty_result.per_tool]
list_scenes = ["\"scenes\":[]"]
"#
        )
        .unwrap();

        let config = LoopSettings::load_from(file.path()).unwrap();
        assert_eq!(config.max_iterations, 8);
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.base_delay_ms, 2000);
        assert_eq!(config.empty_result.per_tool["list_scenes"], ["\"scenes\":[]"]);
        assert_eq!(config.tools.timeout_secs, 120);
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_iterations = \"lots\"").unwrap();
        let err = LoopSettings::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = LoopSettings::default();
        config
            .apply_env_overrides(|key| match key {
                "TURNLOOP_MAX_ITERATIONS" => Some("4".into()),
                "TURNLOOP_MODEL" => Some("gpt-4o".into()),
                "OPENAI_API_KEY" => Some("sk-test".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.max_iterations, 4);
        assert_eq!(config.generation.model, "gpt-4o");
        assert_eq!(config.generation.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn bad_env_iterations_rejected() {
        let mut config = LoopSettings::default();
        let err = config
            .apply_env_overrides(|key| (key == "TURNLOOP_MAX_ITERATIONS").then(|| "many".into()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn generation_config_carries_settings() {
        let mut settings = GenerationSettings::default();
        settings.tool_context_id = "novel-42".into();
        settings
            .extra_params
            .insert("temperature".into(), serde_json::json!(0.2));

        let generation = settings.to_generation_config();
        assert_eq!(generation.model_name, "anthropic/claude-sonnet-4");
        assert_eq!(generation.tool_context_id, "novel-42");
        assert_eq!(generation.extra_params["temperature"], 0.2);
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut settings = LoopSettings::default();
        settings.generation.api_key = Some("sk-secret".into());
        let debug = format!("{settings:?}");
        assert!(!debug.contains("sk-secret"));
    }

    #[test]
    fn config_error_converts_to_domain_error() {
        let err: turnloop_core::Error =
            ConfigError::ValidationError("max_iterations must be at least 1".into()).into();
        assert!(matches!(err, turnloop_core::Error::Config { .. }));
        assert!(err.to_string().contains("max_iterations must be at least 1"));
    }
}
