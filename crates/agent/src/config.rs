//! Configuration for an Anima agent.
//!
//! # Secrets
//!
//! - Config file permission validation on Unix systems
//! - Rejects world-readable files containing an API key or access token
//! - Warns about secrets stored in config files

use std::path::{Path, PathBuf};

use anima_llm::LlmConfig;
use anima_memory::MemoryConfig;
use anima_platform::PlatformConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::publish::PublishRetryConfig;

/// Field names whose values are credentials.
const SECRET_FIELDS: &[&str] = &["api_key", "access_token", "qdrant_api_key"];

/// Top-level agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: AgentSettings,

    #[serde(default)]
    pub publish_retry: PublishRetryConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub platform: PlatformConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Memory identity of the persona
    #[serde(default = "default_agent_id")]
    pub agent_id: String,

    /// Successful interactions after which a cycle stops
    #[serde(default = "default_max_interactions")]
    pub max_interactions_per_cycle: usize,

    /// Relevance floor for memories used as reply context
    #[serde(default = "default_min_relevance")]
    pub min_relevance_score: f64,

    /// Decide and generate but never publish
    #[serde(default)]
    pub observation_mode: bool,

    #[serde(default = "default_adherence_threshold")]
    pub adherence_threshold: f64,

    /// Probability of a short reflection after a successful reply
    #[serde(default = "default_reflection_chance")]
    pub reflection_chance: f64,

    #[serde(default = "default_pacing_min")]
    pub pacing_min_secs: u64,

    #[serde(default = "default_pacing_max")]
    pub pacing_max_secs: u64,

    #[serde(default = "default_persona_file")]
    pub persona_file: PathBuf,

    #[serde(default = "default_metrics_path")]
    pub metrics_path: PathBuf,

    /// Directory for decision/response JSONL logs; disabled when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation_dir: Option<PathBuf>,
}

fn default_agent_id() -> String {
    "anima".into()
}

fn default_max_interactions() -> usize {
    5
}

fn default_min_relevance() -> f64 {
    0.7
}

fn default_adherence_threshold() -> f64 {
    0.6
}

fn default_reflection_chance() -> f64 {
    0.3
}

fn default_pacing_min() -> u64 {
    30
}

fn default_pacing_max() -> u64 {
    120
}

fn default_persona_file() -> PathBuf {
    PathBuf::from("personas/default.json")
}

fn default_metrics_path() -> PathBuf {
    PathBuf::from("data/metrics/cycle_metrics.jsonl")
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            agent_id: default_agent_id(),
            max_interactions_per_cycle: default_max_interactions(),
            min_relevance_score: default_min_relevance(),
            observation_mode: false,
            adherence_threshold: default_adherence_threshold(),
            reflection_chance: default_reflection_chance(),
            pacing_min_secs: default_pacing_min(),
            pacing_max_secs: default_pacing_max(),
            persona_file: default_persona_file(),
            metrics_path: default_metrics_path(),
            simulation_dir: None,
        }
    }
}

impl AgentConfig {
    /// Load configuration from a TOML file.
    ///
    /// On Unix systems the file must be a regular file, must not be
    /// world-writable, and must not be world-readable if it holds a secret.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        #[cfg(unix)]
        validate_config_file_permissions(path)?;

        let config = Self::from_file_unchecked(path)?;

        if config.has_inline_secrets() {
            warn!(
                "Secret found in config file '{}'. Prefer environment variables \
                 (OPENAI_API_KEY, THREADS_ACCESS_TOKEN, QDRANT_API_KEY).",
                path.display()
            );
        }

        Ok(config)
    }

    /// Load configuration without permission checks.
    ///
    /// Use this only for testing or when the file was already validated.
    pub fn from_file_unchecked(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let agent = &self.agent;
        if agent.agent_id.trim().is_empty() {
            anyhow::bail!("agent.agent_id must not be empty");
        }
        if agent.max_interactions_per_cycle == 0 {
            anyhow::bail!("agent.max_interactions_per_cycle must be at least 1");
        }
        if !(0.0..=1.0).contains(&agent.adherence_threshold) {
            anyhow::bail!(
                "agent.adherence_threshold must be within [0, 1], got {}",
                agent.adherence_threshold
            );
        }
        if !(0.0..=1.0).contains(&agent.reflection_chance) {
            anyhow::bail!(
                "agent.reflection_chance must be within [0, 1], got {}",
                agent.reflection_chance
            );
        }
        if agent.pacing_min_secs > agent.pacing_max_secs {
            anyhow::bail!(
                "agent.pacing_min_secs ({}) exceeds agent.pacing_max_secs ({})",
                agent.pacing_min_secs,
                agent.pacing_max_secs
            );
        }
        Ok(())
    }

    fn has_inline_secrets(&self) -> bool {
        self.llm.api_key.is_some()
            || self.platform.access_token.is_some()
            || self.memory.qdrant_api_key.is_some()
            || self.memory.embedding.api_key.is_some()
    }
}

/// Whether any uncommented line assigns a secret field.
fn contains_secret(content: &str) -> bool {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .any(|line| {
            SECRET_FIELDS.iter().any(|field| {
                line.strip_prefix(field)
                    .is_some_and(|rest| rest.trim_start().starts_with('='))
            })
        })
}

/// Validate config file permissions on Unix systems.
///
/// - File must be a regular file (not a directory, device, etc.)
/// - File must not be world-writable (mode & 0o002 == 0)
/// - If the file assigns a secret, it must not be world-readable
#[cfg(unix)]
fn validate_config_file_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;

    if !metadata.is_file() {
        anyhow::bail!("Config path '{}' is not a regular file.", path.display());
    }

    let permission_bits = metadata.permissions().mode() & 0o777;

    if permission_bits & 0o002 != 0 {
        anyhow::bail!(
            "Config file '{}' is world-writable (mode {:04o}). Fix with: chmod o-w {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    let content = std::fs::read_to_string(path).unwrap_or_default();
    let has_secret = contains_secret(&content);

    if has_secret && permission_bits & 0o004 != 0 {
        anyhow::bail!(
            "Config file '{}' contains a secret but is world-readable (mode {:04o}). \
             Fix with: chmod 600 {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    if has_secret && permission_bits & 0o040 != 0 {
        warn!(
            "Config file '{}' contains a secret and is group-readable (mode {:04o}). \
             Consider restricting access with: chmod 600 {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    Ok(())
}
