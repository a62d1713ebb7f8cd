//! Qdrant backend over its REST API.
//!
//! Payload layout is flat: the record text under `data`, the scope under
//! `agent_id` or `user_id`, and every metadata key alongside. Collections
//! written by earlier deployments with the same layout read back unchanged.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument};

use crate::embedding::Embedder;
use crate::error::MemoryError;
use crate::store::MemoryStore;
use crate::types::{
    KEY_MEMORY_TYPE, KEY_POST_ID, KEY_TIMESTAMP, MemoryScope, MessageRole, Metadata,
    MetadataFilter, StoredRecord,
};

const CONTENT_KEY: &str = "data";
const AGENT_KEY: &str = "agent_id";
const USER_KEY: &str = "user_id";
const RESERVED_KEYS: &[&str] = &[CONTENT_KEY, AGENT_KEY, USER_KEY, "hash"];

#[derive(Deserialize)]
struct ApiResponse<T> {
    result: T,
}

#[derive(Deserialize)]
struct ScoredPoint {
    id: Value,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    payload: Option<Metadata>,
}

#[derive(Deserialize)]
struct ScrollResult {
    points: Vec<ScoredPoint>,
}

fn scope_key(scope: &MemoryScope) -> &'static str {
    match scope {
        MemoryScope::Agent(_) => AGENT_KEY,
        MemoryScope::Participant(_) => USER_KEY,
    }
}

/// Payload indexes created with the collection. Recency listings order by
/// `timestamp`, which Qdrant only allows on an indexed field.
const PAYLOAD_INDEXES: &[(&str, &str)] = &[
    (KEY_TIMESTAMP, "datetime"),
    (KEY_MEMORY_TYPE, "keyword"),
    (KEY_POST_ID, "keyword"),
    (AGENT_KEY, "keyword"),
    (USER_KEY, "keyword"),
];

fn scope_filter(scope: &MemoryScope) -> Value {
    matching_filter(scope, &MetadataFilter::default())
}

fn matching_filter(scope: &MemoryScope, filter: &MetadataFilter) -> Value {
    let mut must = vec![json!({ "key": scope_key(scope), "match": { "value": scope.id() } })];
    must.extend(
        filter
            .conditions()
            .iter()
            .map(|(key, value)| json!({ "key": key, "match": { "value": value } })),
    );
    json!({ "must": must })
}

/// Newest first, so `limit` keeps the most recent points. Points without a
/// `timestamp` are left out by Qdrant; every write through the adapter has one.
fn scroll_body(scope: &MemoryScope, filter: &MetadataFilter, limit: usize) -> Value {
    json!({
        "limit": limit,
        "filter": matching_filter(scope, filter),
        "order_by": { "key": KEY_TIMESTAMP, "direction": "desc" },
        "with_payload": true,
        "with_vector": false,
    })
}

fn point_id(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn into_record(point: ScoredPoint) -> StoredRecord {
    let mut payload = point.payload.unwrap_or_default();
    let content = payload
        .get(CONTENT_KEY)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    for key in RESERVED_KEYS {
        payload.remove(*key);
    }
    StoredRecord {
        id: point_id(&point.id),
        content,
        metadata: payload,
        score: point.score,
    }
}

pub struct QdrantStore {
    base_url: String,
    api_key: Option<String>,
    collection: String,
    embedder: Arc<dyn Embedder>,
    http_client: reqwest::Client,
}

impl QdrantStore {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        collection: String,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            collection,
            embedder,
            http_client: reqwest::Client::new(),
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/collections/{}{}", self.base_url, self.collection, path);
        let mut builder = self.http_client.request(method, url);
        if let Some(ref key) = self.api_key {
            builder = builder.header("api-key", key);
        }
        builder
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, MemoryError> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MemoryError::Backend(format!("Qdrant error {status}: {body}")));
        }
        let parsed: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| MemoryError::Backend(format!("Invalid Qdrant response: {e}")))?;
        Ok(parsed.result)
    }

    /// Create the collection if it does not exist yet.
    #[instrument(skip(self), fields(collection = %self.collection))]
    pub async fn ensure_collection(&self) -> Result<(), MemoryError> {
        let response = self.request(Method::GET, "").send().await?;
        if response.status().is_success() {
            debug!("Collection exists");
            return self.ensure_payload_indexes().await;
        }
        if response.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(MemoryError::Backend(format!(
                "Qdrant collection check failed: {}",
                response.status()
            )));
        }

        info!(dimension = self.embedder.dimension(), "Creating Qdrant collection");
        let _: Value = self
            .send(self.request(Method::PUT, "").json(&json!({
                "vectors": { "size": self.embedder.dimension(), "distance": "Cosine" }
            })))
            .await?;
        self.ensure_payload_indexes().await
    }

    /// Index creation is idempotent, so existing collections get any
    /// missing index on startup.
    async fn ensure_payload_indexes(&self) -> Result<(), MemoryError> {
        for (field, schema) in PAYLOAD_INDEXES {
            let _: Value = self
                .send(self.request(Method::PUT, "/index?wait=true").json(&json!({
                    "field_name": field,
                    "field_schema": schema,
                })))
                .await?;
        }
        debug!(indexes = PAYLOAD_INDEXES.len(), "Payload indexes ready");
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for QdrantStore {
    async fn add(
        &self,
        scope: &MemoryScope,
        content: &str,
        role: MessageRole,
        metadata: Metadata,
    ) -> Result<String, MemoryError> {
        let vector = self.embedder.embed(content).await?;
        let id = uuid::Uuid::new_v4().to_string();

        let mut payload = metadata;
        payload.insert(CONTENT_KEY.into(), json!(content));
        payload.insert(scope_key(scope).into(), json!(scope.id()));
        payload.insert("role".into(), serde_json::to_value(role)?);

        let _: Value = self
            .send(self.request(Method::PUT, "/points?wait=true").json(&json!({
                "points": [{ "id": id, "vector": vector, "payload": payload }]
            })))
            .await?;
        debug!(memory_id = %id, scope = %scope, "Stored point");
        Ok(id)
    }

    async fn search(
        &self,
        query: &str,
        scope: &MemoryScope,
        limit: usize,
    ) -> Result<Vec<StoredRecord>, MemoryError> {
        let vector = self.embedder.embed(query).await?;
        let points: Vec<ScoredPoint> = self
            .send(self.request(Method::POST, "/points/search").json(&json!({
                "vector": vector,
                "limit": limit,
                "filter": scope_filter(scope),
                "with_payload": true,
            })))
            .await?;
        Ok(points.into_iter().map(into_record).collect())
    }

    async fn list_matching(
        &self,
        scope: &MemoryScope,
        filter: &MetadataFilter,
        limit: usize,
    ) -> Result<Vec<StoredRecord>, MemoryError> {
        let scroll: ScrollResult = self
            .send(
                self.request(Method::POST, "/points/scroll")
                    .json(&scroll_body(scope, filter, limit)),
            )
            .await?;
        let mut records: Vec<StoredRecord> = scroll.points.into_iter().map(into_record).collect();
        records.reverse();
        Ok(records)
    }

    async fn delete(&self, id: &str) -> Result<bool, MemoryError> {
        let _: Value = self
            .send(
                self.request(Method::POST, "/points/delete?wait=true")
                    .json(&json!({ "points": [id] })),
            )
            .await?;
        Ok(true)
    }

    async fn update_metadata(&self, id: &str, patch: Metadata) -> Result<(), MemoryError> {
        let _: Value = self
            .send(
                self.request(Method::POST, "/points/payload?wait=true")
                    .json(&json!({ "payload": patch, "points": [id] })),
            )
            .await?;
        Ok(())
    }
}
