//! Retry wrapper for completion calls.
//!
//! Mirrors the publish retry in the agent crate: `max_attempts` counts the
//! first call, and only [`LlmError::is_retryable`] failures are repeated. A
//! provider `Retry-After` hint replaces the computed delay, capped by
//! `max_delay_ms`.
//!
//! [`LlmError::is_retryable`]: anima_common::LlmError::is_retryable

use std::time::Duration;

use async_trait::async_trait;
use anima_common::{AnimaError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::client::{LlmClient, LlmRequest, LlmResponse};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    /// Upper bound of the random extra delay, as a fraction of the base
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay_ms: 500,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let base = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let spread = base * self.jitter.max(0.0);
        let extra = if spread > 0.0 {
            rand::thread_rng().gen_range(0.0..spread)
        } else {
            0.0
        };
        Duration::from_millis(((base + extra) as u64).min(self.max_delay_ms))
    }

    fn hinted_delay(&self, error: &AnimaError) -> Option<Duration> {
        match error {
            AnimaError::Llm(e) => e
                .retry_after_ms()
                .map(|ms| Duration::from_millis(ms.min(self.max_delay_ms))),
            _ => None,
        }
    }
}

pub struct RetryingClient<C> {
    inner: C,
    config: RetryConfig,
}

impl<C: LlmClient> RetryingClient<C> {
    pub fn new(inner: C, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl<C: LlmClient> LlmClient for RetryingClient<C> {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.inner.complete(request.clone()).await {
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self
                        .config
                        .hinted_delay(&e)
                        .unwrap_or_else(|| self.config.delay_after(attempt));
                    warn!(
                        model = %self.inner.model_name(),
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient LLM error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}
