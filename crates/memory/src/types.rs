//! Memory types and configuration.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form payload stored next to each record.
pub type Metadata = Map<String, Value>;

pub const KEY_MEMORY_TYPE: &str = "memory_type";
pub const KEY_TIMESTAMP: &str = "timestamp";
pub const KEY_POST_ID: &str = "post_id";
pub const KEY_SKIPPED: &str = "skipped";
pub const KEY_SKIP_REASON: &str = "skip_reason";
pub const KEY_ABOUT: &str = "about";

/// Exact-match conditions on payload keys, all of which must hold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    conditions: Vec<(String, Value)>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((key.into(), value.into()));
        self
    }

    pub fn memory_type(self, memory_type: MemoryType) -> Self {
        self.eq(KEY_MEMORY_TYPE, memory_type.as_str())
    }

    pub fn post_id(self, post_id: &str) -> Self {
        self.eq(KEY_POST_ID, post_id)
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.conditions
            .iter()
            .all(|(key, value)| metadata.get(key) == Some(value))
    }
}

/// Type of memory being stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// Content seen on the platform
    Observation,
    /// Replies, posts and the context they answered
    Interaction,
    /// Insights produced by reflection
    Reflective,
    /// Learned facts
    Semantic,
    /// Specific events
    Episodic,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Observation => "observation",
            MemoryType::Interaction => "interaction",
            MemoryType::Reflective => "reflective",
            MemoryType::Semantic => "semantic",
            MemoryType::Episodic => "episodic",
        }
    }

    /// Lenient parse; unknown or missing types read as observations.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("interaction") => MemoryType::Interaction,
            Some("reflective") => MemoryType::Reflective,
            Some("semantic") => MemoryType::Semantic,
            Some("episodic") => MemoryType::Episodic,
            _ => MemoryType::Observation,
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity namespace a record is stored and searched under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum MemoryScope {
    /// The persona's own utterances and audit trail
    Agent(String),
    /// An interlocutor's content
    Participant(String),
}

impl MemoryScope {
    pub fn id(&self) -> &str {
        match self {
            MemoryScope::Agent(id) | MemoryScope::Participant(id) => id,
        }
    }
}

impl fmt::Display for MemoryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryScope::Agent(id) => write!(f, "agent:{id}"),
            MemoryScope::Participant(id) => write!(f, "participant:{id}"),
        }
    }
}

/// Who "said" the stored content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// A record as the backend returns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// Similarity to the query, for search results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// A record as the agent sees it: typed, with a timezone-aware timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub content: String,
    pub memory_type: MemoryType,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
}

impl MemoryEntry {
    pub fn from_record(record: StoredRecord) -> Self {
        let memory_type =
            MemoryType::parse(record.metadata.get(KEY_MEMORY_TYPE).and_then(Value::as_str));
        let created_at = record
            .metadata
            .get(KEY_TIMESTAMP)
            .and_then(Value::as_str)
            .and_then(normalize_timestamp)
            .unwrap_or_default();
        Self {
            id: record.id,
            content: record.content,
            memory_type,
            created_at,
            metadata: record.metadata,
            relevance_score: record.score,
        }
    }

    pub fn post_id(&self) -> Option<&str> {
        self.metadata.get(KEY_POST_ID).and_then(Value::as_str)
    }

    pub fn is_skipped(&self) -> bool {
        self.metadata
            .get(KEY_SKIPPED)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Parse a stored timestamp. Offset-less values are taken to be UTC.
pub fn normalize_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// Counts used in cycle metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_memories: usize,
    pub by_type: BTreeMap<String, usize>,
}

/// Outcome of the three independent writes behind one interaction.
#[derive(Debug, Clone, Default)]
pub struct InteractionRecord {
    pub participant_id: Option<String>,
    pub response_id: Option<String>,
    pub summary_id: Option<String>,
    pub skipped_duplicates: usize,
    pub errors: Vec<String>,
}

impl InteractionRecord {
    pub fn wrote_any(&self) -> bool {
        self.participant_id.is_some() || self.response_id.is_some() || self.summary_id.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "openai", "fastembed" or "hashing"
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_embedding_dim")]
    pub dimension: usize,

    /// If not set, falls back to OPENAI_API_KEY
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

fn default_embedding_provider() -> String {
    "openai".into()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

fn default_embedding_dim() -> usize {
    1536
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dimension: default_embedding_dim(),
            api_key: None,
            api_url: None,
        }
    }
}

/// Configuration for the memory system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// "qdrant" or "in_memory"
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,

    /// If not set, falls back to QDRANT_API_KEY
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qdrant_api_key: Option<String>,

    /// Defaults to `anima_{agent_id}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Similarity at or above which a write is suppressed as a duplicate
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f64,

    /// Entries scanned for an exact item-id match before observing
    #[serde(default = "default_scan_limit")]
    pub exact_scan_limit: usize,

    /// Entries scanned when checking for a prior interaction
    #[serde(default = "default_scan_limit")]
    pub interaction_scan_limit: usize,

    /// Max length of the agent-side participant summary
    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,
}

fn default_backend() -> String {
    "qdrant".into()
}

fn default_qdrant_url() -> String {
    "http://localhost:6333".into()
}

fn default_dedup_threshold() -> f64 {
    0.85
}

fn default_scan_limit() -> usize {
    200
}

fn default_summary_max_chars() -> usize {
    300
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            qdrant_url: default_qdrant_url(),
            qdrant_api_key: None,
            collection: None,
            embedding: EmbeddingConfig::default(),
            dedup_threshold: default_dedup_threshold(),
            exact_scan_limit: default_scan_limit(),
            interaction_scan_limit: default_scan_limit(),
            summary_max_chars: default_summary_max_chars(),
        }
    }
}

impl MemoryConfig {
    pub fn collection_name(&self, agent_id: &str) -> String {
        self.collection
            .clone()
            .unwrap_or_else(|| format!("anima_{agent_id}"))
    }

    pub fn resolve_qdrant_api_key(&self) -> Option<String> {
        if let Some(ref key) = self.qdrant_api_key
            && !key.is_empty()
        {
            return Some(key.clone());
        }
        std::env::var("QDRANT_API_KEY").ok().filter(|k| !k.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use serde_json::json;

    #[test]
    fn naive_timestamps_are_read_as_utc() {
        let ts = normalize_timestamp("2026-01-05T08:30:00.123456").unwrap();
        assert_eq!(ts.hour(), 8);
        let ts = normalize_timestamp("2026-01-05T08:30:00+02:00").unwrap();
        assert_eq!(ts.hour(), 6);
        assert!(normalize_timestamp("not a time").is_none());
    }

    #[test]
    fn entry_from_record_reads_type_and_time() {
        let mut metadata = Metadata::new();
        metadata.insert(KEY_MEMORY_TYPE.into(), json!("interaction"));
        metadata.insert(KEY_TIMESTAMP.into(), json!("2026-01-05T08:30:00"));
        metadata.insert(KEY_POST_ID.into(), json!("42"));
        let entry = MemoryEntry::from_record(StoredRecord {
            id: "m1".into(),
            content: "hi".into(),
            metadata,
            score: Some(0.9),
        });
        assert_eq!(entry.memory_type, MemoryType::Interaction);
        assert_eq!(entry.post_id(), Some("42"));
        assert_eq!(entry.created_at.hour(), 8);
        assert!(!entry.is_skipped());
    }

    #[test]
    fn filter_requires_every_condition() {
        let mut metadata = Metadata::new();
        metadata.insert(KEY_MEMORY_TYPE.into(), json!("interaction"));
        metadata.insert(KEY_POST_ID.into(), json!("42"));

        assert!(MetadataFilter::new().matches(&metadata));
        let interaction = MetadataFilter::new().memory_type(MemoryType::Interaction);
        assert!(interaction.clone().post_id("42").matches(&metadata));
        assert!(!interaction.post_id("43").matches(&metadata));
        assert!(!MetadataFilter::new()
            .memory_type(MemoryType::Observation)
            .matches(&metadata));
    }

    #[test]
    fn unknown_type_reads_as_observation() {
        assert_eq!(MemoryType::parse(Some("procedural")), MemoryType::Observation);
        assert_eq!(MemoryType::parse(None), MemoryType::Observation);
    }

    #[test]
    fn scope_display() {
        assert_eq!(MemoryScope::Agent("mika".into()).to_string(), "agent:mika");
        assert_eq!(
            MemoryScope::Participant("participant_bob".into()).to_string(),
            "participant:participant_bob"
        );
    }

    #[test]
    fn config_defaults() {
        let config: MemoryConfig = toml::from_str("").unwrap();
        assert_eq!(config.backend, "qdrant");
        assert!((config.dedup_threshold - 0.85).abs() < f64::EPSILON);
        assert_eq!(config.exact_scan_limit, 200);
        assert_eq!(config.summary_max_chars, 300);
        assert_eq!(config.collection_name("mika"), "anima_mika");
    }
}
