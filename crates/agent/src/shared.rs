//! Process-wide handle that serializes cycles.

use std::sync::Arc;

use anima_common::CandidateItem;
use tokio::sync::Mutex;
use tracing::debug;

use crate::cycle::{AgentStats, CycleController, InteractionResult};

/// Cloneable handle over one [`CycleController`].
///
/// Timer and webhook triggers share a handle; the lock is held for the whole
/// cycle so daily counters never see two cycles at once.
#[derive(Clone)]
pub struct SharedAgent {
    inner: Arc<Mutex<CycleController>>,
}

impl SharedAgent {
    pub fn new(controller: CycleController) -> Self {
        Self {
            inner: Arc::new(Mutex::new(controller)),
        }
    }

    pub async fn run_cycle(&self, external_items: Option<Vec<CandidateItem>>) -> Vec<InteractionResult> {
        let mut controller = self.inner.lock().await;
        debug!("Acquired cycle lock");
        controller.run_cycle(external_items).await
    }

    pub async fn create_original_post(&self, topic: Option<&str>) -> Option<String> {
        self.inner.lock().await.create_original_post(topic).await
    }

    pub async fn stats(&self) -> AgentStats {
        self.inner.lock().await.agent_stats().await
    }

    pub async fn close(&self) {
        self.inner.lock().await.close().await;
    }
}
