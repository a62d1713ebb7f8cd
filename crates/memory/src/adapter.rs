//! Failure-absorbing front for a [`MemoryStore`].
//!
//! Every write is stamped with a timezone-aware timestamp, every read is
//! normalized into [`MemoryEntry`] values.

use std::sync::Arc;

use anima_common::Clock;
use serde_json::json;
use tracing::warn;

use crate::error::MemoryError;
use crate::store::MemoryStore;
use crate::types::{KEY_TIMESTAMP, MemoryEntry, MemoryScope, MessageRole, Metadata, MetadataFilter};

#[derive(Clone)]
pub struct MemoryAdapter {
    store: Arc<dyn MemoryStore>,
    clock: Arc<dyn Clock>,
}

impl MemoryAdapter {
    pub fn new(store: Arc<dyn MemoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Append one record, surfacing the backend error.
    pub async fn try_add(
        &self,
        scope: &MemoryScope,
        content: &str,
        role: MessageRole,
        mut metadata: Metadata,
    ) -> Result<String, MemoryError> {
        if !metadata.contains_key(KEY_TIMESTAMP) {
            metadata.insert(KEY_TIMESTAMP.into(), json!(self.clock.now().to_rfc3339()));
        }
        self.store.add(scope, content, role, metadata).await
    }

    /// Append one record. A failed write is logged and reads as "not recorded".
    pub async fn add(
        &self,
        scope: &MemoryScope,
        content: &str,
        role: MessageRole,
        metadata: Metadata,
    ) -> Option<String> {
        match self.try_add(scope, content, role, metadata).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(scope = %scope, error = %e, "Memory write failed");
                None
            }
        }
    }

    pub async fn search(
        &self,
        query: &str,
        scope: &MemoryScope,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, MemoryError> {
        let records = self.store.search(query, scope, limit).await?;
        Ok(records.into_iter().map(MemoryEntry::from_record).collect())
    }

    pub async fn list_all(
        &self,
        scope: &MemoryScope,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, MemoryError> {
        let records = self.store.list_all(scope, limit).await?;
        Ok(records.into_iter().map(MemoryEntry::from_record).collect())
    }

    /// Newest `limit` records in `scope` matching `filter`, oldest first.
    pub async fn list_matching(
        &self,
        scope: &MemoryScope,
        filter: &MetadataFilter,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, MemoryError> {
        let records = self.store.list_matching(scope, filter, limit).await?;
        Ok(records.into_iter().map(MemoryEntry::from_record).collect())
    }

    pub async fn delete(&self, id: &str) -> bool {
        match self.store.delete(id).await {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!(memory_id = %id, error = %e, "Memory delete failed");
                false
            }
        }
    }

    pub async fn update_metadata(&self, id: &str, patch: Metadata) -> bool {
        match self.store.update_metadata(id, patch).await {
            Ok(()) => true,
            Err(e) => {
                warn!(memory_id = %id, error = %e, "Memory metadata update failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::store::InMemoryStore;
    use anima_common::FixedClock;
    use chrono::{TimeZone, Utc};

    fn setup() -> (Arc<InMemoryStore>, MemoryAdapter) {
        let store = Arc::new(InMemoryStore::new(Arc::new(HashingEmbedder::default())));
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        ));
        let adapter = MemoryAdapter::new(store.clone(), clock);
        (store, adapter)
    }

    #[tokio::test]
    async fn writes_are_timestamped() {
        let (_store, adapter) = setup();
        let scope = MemoryScope::Agent("mika".into());
        adapter
            .add(&scope, "hello", MessageRole::Assistant, Metadata::new())
            .await
            .unwrap();
        let entries = adapter.list_all(&scope, 10).await.unwrap();
        assert_eq!(
            entries[0].created_at,
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn failed_write_returns_none() {
        let (store, adapter) = setup();
        store.set_fail_writes(true);
        let id = adapter
            .add(
                &MemoryScope::Agent("mika".into()),
                "hello",
                MessageRole::Assistant,
                Metadata::new(),
            )
            .await;
        assert!(id.is_none());
        assert!(!adapter.delete("mem_000001").await);
    }
}
