//! Bounded exponential backoff around platform publish calls.

use std::future::Future;
use std::time::Duration;

use anima_platform::{PlatformError, PlatformResult};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishRetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for PublishRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

impl PublishRetryConfig {
    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay_ms = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis((delay_ms as u64).min(self.max_delay_ms))
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
///
/// Only errors where [`PlatformError::is_transient`] holds are retried.
pub async fn publish_with_retry<T, F, Fut>(config: &PublishRetryConfig, mut op: F) -> PlatformResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PlatformResult<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = config.delay_after(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient publish error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Error kinds worth a retry, for logging at call sites.
pub fn describe(error: &PlatformError) -> &'static str {
    if error.is_not_found() {
        "not_found"
    } else if error.is_transient() {
        "transient"
    } else {
        "permanent"
    }
}
