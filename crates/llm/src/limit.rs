use std::sync::Arc;

use async_trait::async_trait;
use anima_common::{LlmError, Result};
use tokio::sync::Semaphore;

use crate::client::{LlmClient, LlmRequest, LlmResponse};

/// Caps in-flight completions per model. A retry sleeps while holding its
/// permit, so a throttled provider is not hit by queued callers meanwhile.
pub struct SemaphoredClient {
    inner: Arc<dyn LlmClient>,
    permits: Arc<Semaphore>,
}

impl SemaphoredClient {
    pub fn new(inner: Arc<dyn LlmClient>, max_concurrent: usize) -> Self {
        Self {
            inner,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[async_trait]
impl LlmClient for SemaphoredClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| LlmError::Request("completion limiter closed".into()))?;
        self.inner.complete(request).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Slow {
        in_flight: AtomicU32,
        peak: AtomicU32,
    }

    #[async_trait]
    impl LlmClient for Slow {
        async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(LlmResponse {
                content: "ok".into(),
                model: "slow".into(),
                usage: None,
                finish_reason: None,
            })
        }

        fn model_name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_calls_never_exceed_limit() {
        let slow = Arc::new(Slow::default());
        let limited = Arc::new(SemaphoredClient::new(slow.clone(), 2));
        assert_eq!(limited.available(), 2);

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let client = limited.clone();
                tokio::spawn(async move { client.complete(LlmRequest::default()).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(slow.peak.load(Ordering::SeqCst), 2);
        assert_eq!(limited.available(), 2);
    }

    #[test]
    fn zero_limit_still_admits_one() {
        let limited = SemaphoredClient::new(Arc::new(Slow::default()), 0);
        assert_eq!(limited.available(), 1);
    }
}
