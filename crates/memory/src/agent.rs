//! The agent's view of its memory: two identity scopes over one store.

use std::sync::Arc;

use anima_common::Clock;

use crate::adapter::MemoryAdapter;
use crate::error::MemoryError;
use crate::store::{MemoryStore, build_memory_store};
use crate::types::{MemoryConfig, MemoryScope};

/// Minimum content length considered for semantic dedup.
pub const MIN_DEDUP_CHARS: usize = 10;

/// Deduplication and retrieval policy for one agent.
///
/// The agent's own records live under the agent scope; authorless
/// observations land under a participant scope named after the agent, so
/// "own" reads always merge both.
pub struct AgentMemory {
    pub(crate) adapter: MemoryAdapter,
    pub(crate) agent_id: String,
    pub(crate) dedup_threshold: f64,
    pub(crate) exact_scan_limit: usize,
    pub(crate) interaction_scan_limit: usize,
    pub(crate) summary_max_chars: usize,
}

impl AgentMemory {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        clock: Arc<dyn Clock>,
        agent_id: impl Into<String>,
    ) -> Self {
        let defaults = MemoryConfig::default();
        Self {
            adapter: MemoryAdapter::new(store, clock),
            agent_id: agent_id.into(),
            dedup_threshold: defaults.dedup_threshold,
            exact_scan_limit: defaults.exact_scan_limit,
            interaction_scan_limit: defaults.interaction_scan_limit,
            summary_max_chars: defaults.summary_max_chars,
        }
    }

    /// Build the configured backend and wrap it.
    pub async fn from_config(
        config: &MemoryConfig,
        agent_id: &str,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, MemoryError> {
        let store = build_memory_store(config, agent_id).await?;
        Ok(Self::new(store, clock, agent_id).with_config(config))
    }

    pub fn with_config(mut self, config: &MemoryConfig) -> Self {
        self.dedup_threshold = config.dedup_threshold;
        self.exact_scan_limit = config.exact_scan_limit;
        self.interaction_scan_limit = config.interaction_scan_limit;
        self.summary_max_chars = config.summary_max_chars;
        self
    }

    pub fn with_dedup_threshold(mut self, threshold: f64) -> Self {
        self.dedup_threshold = threshold;
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn dedup_threshold(&self) -> f64 {
        self.dedup_threshold
    }

    pub fn adapter(&self) -> &MemoryAdapter {
        &self.adapter
    }

    pub fn agent_scope(&self) -> MemoryScope {
        MemoryScope::Agent(self.agent_id.clone())
    }

    /// Scopes holding the agent's own records.
    pub fn own_scopes(&self) -> [MemoryScope; 2] {
        [
            MemoryScope::Agent(self.agent_id.clone()),
            MemoryScope::Participant(self.agent_id.clone()),
        ]
    }
}

/// Char-safe truncation.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
