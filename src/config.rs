//! Configuration shapes consumed by the runner.
//!
//! The YAML config loader, the project scaffolder, and the compile/build
//! pipeline that produces these values are external collaborators — this
//! module only defines the parsed shapes the core consumes, plus a thin
//! loader used by `main` and by tests that want a config from a file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{AppError, Result};

/// A single advertised skill.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SkillConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Capability flags advertised on the agent card.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CapabilitiesConfig {
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub push_notifications: bool,
    #[serde(default)]
    pub state_transition_history: bool,
}

/// Discovery metadata — the static half of the agent card.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub skills: Vec<SkillConfig>,
    #[serde(default)]
    pub capabilities: CapabilitiesConfig,
}

/// Chat-completion model settings for the in-process LLM executor.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct ModelConfig {
    pub provider: Option<String>,
    pub model: Option<String>,
    /// Name of the environment variable holding the API key.
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub max_iterations: Option<usize>,
}

/// Subprocess entrypoint settings for the subprocess runtime.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct SubprocessConfig {
    #[serde(default)]
    pub entrypoint: String,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// One channel adapter entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ChannelConfig {
    pub name: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub settings: HashMap<String, String>,
    /// URL of the A2A endpoint the channel posts `tasks/send` to.
    #[serde(default)]
    pub agent_url: Option<String>,
}

impl ChannelConfig {
    /// Resolves settings keys ending in `_env` through the process
    /// environment: `{K}_env: VARNAME` becomes `{K}: getenv(VARNAME)`.
    /// Keys without the suffix pass through unchanged.
    pub fn resolved_settings(&self) -> HashMap<String, String> {
        let mut out = HashMap::with_capacity(self.settings.len());
        for (key, value) in &self.settings {
            if let Some(stripped) = key.strip_suffix("_env") {
                let resolved = std::env::var(value).unwrap_or_default();
                out.insert(stripped.to_string(), resolved);
            } else {
                out.insert(key.clone(), value.clone());
            }
        }
        out
    }
}

/// Guardrail enforcement mode: fail the call, or merely log and allow it.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailMode {
    #[default]
    Enforce,
    Observe,
}

/// One guardrail descriptor from the (externally built) policy scaffold.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct GuardrailDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub mode: GuardrailMode,
}

/// Zero or more guardrail descriptors, consumed read-only by the guardrail
/// engine.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct PolicyScaffold {
    #[serde(default)]
    pub guardrails: Vec<GuardrailDescriptor>,
}

/// Hot-reload watcher settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct WatchConfig {
    #[serde(default)]
    pub enabled: bool,
    pub work_dir: Option<PathBuf>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            work_dir: None,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    41241
}

/// Top-level configuration the runner assembles everything from.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct CoreConfig {
    pub agent: AgentConfig,
    /// When set to `crewai` or `langchain`, the runner assembles a
    /// subprocess executor instead of an in-process LLM loop.
    #[serde(default)]
    pub framework: Option<String>,
    #[serde(default)]
    pub mock_tools: bool,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub subprocess: SubprocessConfig,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub policy: PolicyScaffold,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl CoreConfig {
    /// Loads and validates configuration from a YAML file path.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_yaml_str(&raw)
    }

    /// Parses configuration from a YAML string and validates it.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.agent.name.trim().is_empty() {
            return Err(AppError::Config("agent.name must not be empty".into()));
        }
        if self.agent.url.trim().is_empty() {
            return Err(AppError::Config("agent.url must not be empty".into()));
        }
        Ok(())
    }
}
