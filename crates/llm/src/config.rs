//! `[llm]` configuration and the client stack built from it.

use std::sync::Arc;
use std::time::Duration;

use anima_common::{AnimaError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::LlmClient;
use crate::limit::SemaphoredClient;
use crate::openai::{OPENAI_BASE_URL, OpenAiClient};
use crate::retry::{RetryConfig, RetryingClient};

const OLLAMA_BASE_URL: &str = "http://localhost:11434";
const OPENAI_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// "openai" or "ollama"
    pub provider: String,
    /// Engagement decisions, replies and adherence scoring
    pub model: String,
    /// Refinement, reflections and original posts
    pub advanced_model: String,
    /// Falls back to OPENAI_API_KEY for the "openai" provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub timeout_secs: u64,
    pub max_concurrent_requests: usize,
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            advanced_model: "gpt-4o".into(),
            api_key: None,
            api_url: None,
            temperature: None,
            max_tokens: None,
            timeout_secs: 60,
            max_concurrent_requests: 2,
            retry: RetryConfig::default(),
        }
    }
}

impl LlmConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        let configured = self.api_key.clone().filter(|k| !k.is_empty());
        match self.provider.as_str() {
            "openai" => configured.or_else(|| std::env::var(OPENAI_KEY_ENV).ok()),
            _ => configured,
        }
    }

    /// Same connection settings, pointed at `advanced_model`.
    pub fn for_advanced_model(&self) -> Self {
        Self {
            model: self.advanced_model.clone(),
            ..self.clone()
        }
    }

    fn base_url(&self) -> Result<&str> {
        let fallback = match self.provider.as_str() {
            "openai" => OPENAI_BASE_URL,
            "ollama" => OLLAMA_BASE_URL,
            other => {
                return Err(AnimaError::Config(format!("Unknown LLM provider: {other}")));
            }
        };
        Ok(self.api_url.as_deref().unwrap_or(fallback))
    }
}

/// HTTP client for `config.model`, wrapped in retry and then the
/// concurrency limit.
pub fn build_llm_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    let base_url = config.base_url()?;
    let api_key = match config.provider.as_str() {
        "ollama" => None,
        _ => config.resolve_api_key(),
    };
    let http = OpenAiClient::new(
        base_url,
        config.model.clone(),
        api_key,
        Duration::from_secs(config.timeout_secs),
    )?;
    debug!(provider = %config.provider, model = %config.model, base_url, "Built LLM client");

    let retrying: Arc<dyn LlmClient> = Arc::new(RetryingClient::new(http, config.retry.clone()));
    Ok(Arc::new(SemaphoredClient::new(
        retrying,
        config.max_concurrent_requests,
    )))
}
