//! Vector-similarity backends.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::embedding::{Embedder, build_embedder, cosine_similarity};
use crate::error::MemoryError;
use crate::qdrant::QdrantStore;
use crate::types::{
    KEY_TIMESTAMP, MemoryConfig, MemoryScope, MessageRole, Metadata, MetadataFilter, StoredRecord,
    normalize_timestamp,
};

/// Keyed add/search/list/delete over scope-addressed records.
///
/// No cross-call transactions: each call succeeds or fails on its own.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn add(
        &self,
        scope: &MemoryScope,
        content: &str,
        role: MessageRole,
        metadata: Metadata,
    ) -> Result<String, MemoryError>;

    /// Similarity search within one scope, best first.
    async fn search(
        &self,
        query: &str,
        scope: &MemoryScope,
        limit: usize,
    ) -> Result<Vec<StoredRecord>, MemoryError>;

    /// The `limit` most recent records in `scope` (by stored timestamp)
    /// whose payload satisfies `filter`, returned oldest first. The filter is
    /// applied before the limit.
    async fn list_matching(
        &self,
        scope: &MemoryScope,
        filter: &MetadataFilter,
        limit: usize,
    ) -> Result<Vec<StoredRecord>, MemoryError>;

    /// The `limit` most recent records in `scope`, oldest first.
    async fn list_all(
        &self,
        scope: &MemoryScope,
        limit: usize,
    ) -> Result<Vec<StoredRecord>, MemoryError> {
        self.list_matching(scope, &MetadataFilter::default(), limit)
            .await
    }

    async fn delete(&self, id: &str) -> Result<bool, MemoryError>;

    /// Merge `patch` into the record's payload, leaving content untouched.
    async fn update_metadata(&self, id: &str, patch: Metadata) -> Result<(), MemoryError>;
}

fn stored_timestamp(record: &StoredRecord) -> Option<DateTime<Utc>> {
    record
        .metadata
        .get(KEY_TIMESTAMP)
        .and_then(serde_json::Value::as_str)
        .and_then(normalize_timestamp)
}

struct Row {
    record: StoredRecord,
    scopes: Vec<MemoryScope>,
    embedding: Vec<f32>,
}

/// Process-local backend: cosine similarity over an [`Embedder`].
///
/// Write and read failures can be switched on to exercise degraded paths.
pub struct InMemoryStore {
    embedder: Arc<dyn Embedder>,
    rows: RwLock<Vec<Row>>,
    next_id: AtomicUsize,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl InMemoryStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            rows: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(1),
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Insert a record visible under several scopes at once, as legacy
    /// records written with both identity keys are.
    pub async fn import(
        &self,
        record: StoredRecord,
        scopes: Vec<MemoryScope>,
    ) -> Result<(), MemoryError> {
        let embedding = self.embedder.embed(&record.content).await?;
        self.rows.write().await.push(Row {
            record,
            scopes,
            embedding,
        });
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    fn check_reads(&self) -> Result<(), MemoryError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(MemoryError::Backend("read failure injected".into()));
        }
        Ok(())
    }

    fn check_writes(&self) -> Result<(), MemoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(MemoryError::Backend("write failure injected".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn add(
        &self,
        scope: &MemoryScope,
        content: &str,
        role: MessageRole,
        mut metadata: Metadata,
    ) -> Result<String, MemoryError> {
        self.check_writes()?;
        let embedding = self.embedder.embed(content).await?;
        let id = format!("mem_{:06}", self.next_id.fetch_add(1, Ordering::SeqCst));
        metadata.insert("role".into(), serde_json::to_value(role)?);

        debug!(memory_id = %id, scope = %scope, "Adding memory");
        self.rows.write().await.push(Row {
            record: StoredRecord {
                id: id.clone(),
                content: content.to_string(),
                metadata,
                score: None,
            },
            scopes: vec![scope.clone()],
            embedding,
        });
        Ok(id)
    }

    async fn search(
        &self,
        query: &str,
        scope: &MemoryScope,
        limit: usize,
    ) -> Result<Vec<StoredRecord>, MemoryError> {
        self.check_reads()?;
        let query_embedding = self.embedder.embed(query).await?;
        let rows = self.rows.read().await;
        let mut scored: Vec<StoredRecord> = rows
            .iter()
            .filter(|row| row.scopes.contains(scope))
            .map(|row| StoredRecord {
                score: Some(cosine_similarity(&query_embedding, &row.embedding)),
                ..row.record.clone()
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn list_matching(
        &self,
        scope: &MemoryScope,
        filter: &MetadataFilter,
        limit: usize,
    ) -> Result<Vec<StoredRecord>, MemoryError> {
        self.check_reads()?;
        let rows = self.rows.read().await;
        // insertion order breaks timestamp ties
        let mut matching: Vec<(Option<DateTime<Utc>>, usize, &StoredRecord)> = rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.scopes.contains(scope) && filter.matches(&row.record.metadata))
            .map(|(pos, row)| (stored_timestamp(&row.record), pos, &row.record))
            .collect();
        matching.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        let skip = matching.len().saturating_sub(limit);
        Ok(matching
            .into_iter()
            .skip(skip)
            .map(|(_, _, record)| record.clone())
            .collect())
    }

    async fn delete(&self, id: &str) -> Result<bool, MemoryError> {
        self.check_writes()?;
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|row| row.record.id != id);
        Ok(rows.len() != before)
    }

    async fn update_metadata(&self, id: &str, patch: Metadata) -> Result<(), MemoryError> {
        self.check_writes()?;
        let mut rows = self.rows.write().await;
        let row = rows
            .iter_mut()
            .find(|row| row.record.id == id)
            .ok_or_else(|| MemoryError::NotFound(id.to_string()))?;
        for (key, value) in patch {
            row.record.metadata.insert(key, value);
        }
        Ok(())
    }
}

/// Build the configured backend.
pub async fn build_memory_store(
    config: &MemoryConfig,
    agent_id: &str,
) -> Result<Arc<dyn MemoryStore>, MemoryError> {
    let embedder = build_embedder(&config.embedding)?;
    match config.backend.as_str() {
        "in_memory" => {
            info!("Using in-memory store; memories will not survive a restart");
            Ok(Arc::new(InMemoryStore::new(embedder)))
        }
        "qdrant" => {
            let store = QdrantStore::new(
                config.qdrant_url.clone(),
                config.resolve_qdrant_api_key(),
                config.collection_name(agent_id),
                embedder,
            );
            store.ensure_collection().await?;
            Ok(Arc::new(store))
        }
        other => Err(MemoryError::Backend(format!(
            "Unknown memory backend: {other}"
        ))),
    }
}
