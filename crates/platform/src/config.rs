use std::sync::Arc;
use std::time::Duration;

use anima_common::{AnimaError, Result};
use serde::{Deserialize, Serialize};

use crate::client::PlatformClient;
use crate::mock::MockPlatform;
use crate::threads::ThreadsClient;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// "threads" or "mock"
    #[serde(default = "default_provider")]
    pub provider: String,

    /// If not set, falls back to THREADS_ACCESS_TOKEN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    #[serde(default = "default_user_id")]
    pub user_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Username reported by the mock provider
    #[serde(default = "default_mock_username")]
    pub mock_username: String,
}

fn default_provider() -> String {
    "threads".into()
}

fn default_user_id() -> String {
    "me".into()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_mock_username() -> String {
    "anima".into()
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            access_token: None,
            user_id: default_user_id(),
            base_url: None,
            timeout_secs: default_timeout_secs(),
            mock_username: default_mock_username(),
        }
    }
}

impl PlatformConfig {
    pub fn resolve_access_token(&self) -> Option<String> {
        if let Some(ref token) = self.access_token
            && !token.is_empty()
        {
            return Some(token.clone());
        }
        std::env::var("THREADS_ACCESS_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
    }
}

pub fn build_platform_client(config: &PlatformConfig) -> Result<Arc<dyn PlatformClient>> {
    match config.provider.as_str() {
        "threads" => {
            let token = config.resolve_access_token().ok_or_else(|| {
                AnimaError::Config(
                    "Threads requires an access token (set THREADS_ACCESS_TOKEN)".to_string(),
                )
            })?;
            Ok(Arc::new(ThreadsClient::new(
                config.base_url.clone(),
                token,
                config.user_id.clone(),
                Duration::from_secs(config.timeout_secs),
            )))
        }
        "mock" => Ok(Arc::new(MockPlatform::new(config.mock_username.clone()))),
        other => Err(AnimaError::Config(format!(
            "Unknown platform provider: {other}"
        ))),
    }
}
