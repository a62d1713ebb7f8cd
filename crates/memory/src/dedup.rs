//! Write paths and their duplicate guards.
//!
//! Raw observations are guarded by exact item id. Agent-authored content is
//! guarded by similarity, since a summary may paraphrase an observation
//! without being the same record.

use serde_json::json;
use tracing::{debug, info, warn};

use crate::agent::{AgentMemory, MIN_DEDUP_CHARS, truncate_chars};
use crate::types::{
    InteractionRecord, KEY_ABOUT, KEY_MEMORY_TYPE, KEY_POST_ID, KEY_SKIP_REASON, KEY_SKIPPED,
    MemoryScope, MemoryType, MessageRole, Metadata, MetadataFilter,
};

const SKIPPED_CONTENT_CHARS: usize = 100;

fn typed_metadata(memory_type: MemoryType) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(KEY_MEMORY_TYPE.into(), json!(memory_type.as_str()));
    metadata
}

impl AgentMemory {
    /// Whether any scope in `scopes` holds an entry with `post_id == item_id`
    /// among its `scan_limit` newest such entries. The backend matches the id
    /// before the limit applies, so unrelated writes cannot hide a match.
    /// Read errors answer `false`.
    pub async fn has_exact_id(&self, item_id: &str, scopes: &[MemoryScope], scan_limit: usize) -> bool {
        let filter = MetadataFilter::new().post_id(item_id);
        for scope in scopes {
            match self.adapter.list_matching(scope, &filter, scan_limit).await {
                Ok(entries) => {
                    if entries.iter().any(|e| e.post_id() == Some(item_id)) {
                        return true;
                    }
                }
                Err(e) => {
                    warn!(scope = %scope, item_id, error = %e, "Exact-id scan failed");
                }
            }
        }
        false
    }

    /// Whether a top-3 similarity hit in `scope` scores at or above
    /// `threshold`. Short content and read errors answer `false`.
    pub async fn is_semantic_duplicate(
        &self,
        content: &str,
        scope: &MemoryScope,
        threshold: f64,
    ) -> bool {
        if content.trim().chars().count() < MIN_DEDUP_CHARS {
            return false;
        }
        match self.adapter.search(content, scope, 3).await {
            Ok(hits) => hits
                .iter()
                .any(|hit| hit.relevance_score.is_some_and(|s| s >= threshold)),
            Err(e) => {
                warn!(scope = %scope, error = %e, "Similarity check failed");
                false
            }
        }
    }

    /// Store one interaction as up to three independent records: the
    /// participant's content, the agent's response, and an agent-side summary
    /// of the participant. Without a participant only the response is written.
    pub async fn record_interaction(
        &self,
        response: &str,
        context: &str,
        item_id: Option<&str>,
        participant_id: Option<&str>,
        interaction_type: &str,
    ) -> InteractionRecord {
        let mut record = InteractionRecord::default();
        let agent_scope = self.agent_scope();

        let mut base = typed_metadata(MemoryType::Interaction);
        base.insert("interaction_type".into(), json!(interaction_type));
        if let Some(id) = item_id {
            base.insert(KEY_POST_ID.into(), json!(id));
        }
        if let Some(participant) = participant_id {
            base.insert("participant_id".into(), json!(participant));
        }

        if let Some(participant) = participant_id {
            let scope = MemoryScope::Participant(participant.to_string());
            let (id, skipped) = self
                .guarded_add(&scope, context, MessageRole::User, base.clone(), &mut record.errors)
                .await;
            record.participant_id = id;
            record.skipped_duplicates += usize::from(skipped);
        }

        let (id, skipped) = self
            .guarded_add(&agent_scope, response, MessageRole::Assistant, base.clone(), &mut record.errors)
            .await;
        record.response_id = id;
        record.skipped_duplicates += usize::from(skipped);

        if let Some(participant) = participant_id {
            let summary = truncate_chars(
                &format!("[{participant}] {}", context.trim()),
                self.summary_max_chars,
            );
            let mut metadata = base;
            metadata.insert(KEY_ABOUT.into(), json!("participant_summary"));
            let (id, skipped) = self
                .guarded_add(&agent_scope, &summary, MessageRole::Assistant, metadata, &mut record.errors)
                .await;
            record.summary_id = id;
            record.skipped_duplicates += usize::from(skipped);
        }

        if record.wrote_any() {
            info!(
                item_id = ?item_id,
                participant = ?participant_id,
                skipped = record.skipped_duplicates,
                errors = record.errors.len(),
                "Recorded interaction"
            );
        } else {
            debug!(
                item_id = ?item_id,
                skipped = record.skipped_duplicates,
                errors = record.errors.len(),
                "Interaction wrote nothing new"
            );
        }
        record
    }

    /// Returns `(id, suppressed_as_duplicate)`.
    async fn guarded_add(
        &self,
        scope: &MemoryScope,
        content: &str,
        role: MessageRole,
        metadata: Metadata,
        errors: &mut Vec<String>,
    ) -> (Option<String>, bool) {
        if self
            .is_semantic_duplicate(content, scope, self.dedup_threshold)
            .await
        {
            debug!(scope = %scope, "Skipping near-duplicate write");
            return (None, true);
        }
        match self.adapter.try_add(scope, content, role, metadata).await {
            Ok(id) => (Some(id), false),
            Err(e) => {
                warn!(scope = %scope, error = %e, "Interaction write failed");
                errors.push(format!("{scope}: {e}"));
                (None, false)
            }
        }
    }

    /// Record content seen on the platform. Authored content goes to the
    /// author's participant scope.
    pub async fn observe(
        &self,
        content: &str,
        item_id: Option<&str>,
        author: Option<&str>,
    ) -> Option<String> {
        let scope = match author {
            Some(author) => MemoryScope::Participant(format!("participant_{author}")),
            None => MemoryScope::Participant(self.agent_id.clone()),
        };

        if let Some(id) = item_id
            && self
                .has_exact_id(id, std::slice::from_ref(&scope), self.exact_scan_limit)
                .await
        {
            debug!(item_id = id, scope = %scope, "Observation already stored");
            return None;
        }

        let mut metadata = typed_metadata(MemoryType::Observation);
        if let Some(id) = item_id {
            metadata.insert(KEY_POST_ID.into(), json!(id));
        }
        if let Some(author) = author {
            metadata.insert("author".into(), json!(author));
        }
        self.adapter
            .add(&scope, content, MessageRole::User, metadata)
            .await
    }

    /// Audit record for an item the agent declined. Never used as context.
    pub async fn record_skipped(&self, content: &str, item_id: &str, reason: &str) -> Option<String> {
        let scope = self.agent_scope();
        if self
            .has_exact_id(item_id, std::slice::from_ref(&scope), self.exact_scan_limit)
            .await
        {
            debug!(item_id, "Skip already recorded");
            return None;
        }

        let mut metadata = typed_metadata(MemoryType::Observation);
        metadata.insert(KEY_POST_ID.into(), json!(item_id));
        metadata.insert(KEY_SKIPPED.into(), json!(true));
        metadata.insert(KEY_SKIP_REASON.into(), json!(reason));
        let snippet = truncate_chars(content, SKIPPED_CONTENT_CHARS);
        self.adapter
            .add(&scope, &snippet, MessageRole::User, metadata)
            .await
    }

    pub async fn add_reflection(&self, insights: &str, based_on: &[String]) -> Option<String> {
        let scope = self.agent_scope();
        if self
            .is_semantic_duplicate(insights, &scope, self.dedup_threshold)
            .await
        {
            debug!("Skipping near-duplicate reflection");
            return None;
        }
        let mut metadata = typed_metadata(MemoryType::Reflective);
        metadata.insert("based_on_memories".into(), json!(based_on));
        self.adapter
            .add(&scope, insights, MessageRole::Assistant, metadata)
            .await
    }

    /// Flag an existing record as skipped without touching its content.
    pub async fn mark_skipped(&self, memory_id: &str, reason: &str) -> bool {
        let mut patch = Metadata::new();
        patch.insert(KEY_SKIPPED.into(), json!(true));
        patch.insert(KEY_SKIP_REASON.into(), json!(reason));
        self.adapter.update_metadata(memory_id, patch).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anima_common::FixedClock;
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::store::InMemoryStore;

    fn setup() -> (Arc<InMemoryStore>, AgentMemory) {
        let store = Arc::new(InMemoryStore::new(Arc::new(HashingEmbedder::default())));
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        ));
        let memory = AgentMemory::new(store.clone(), clock, "mika");
        (store, memory)
    }

    #[tokio::test]
    async fn short_content_is_never_a_duplicate() {
        let (_store, memory) = setup();
        let scope = memory.agent_scope();
        memory
            .adapter()
            .add(&scope, "ok!", MessageRole::Assistant, Metadata::new())
            .await;
        assert!(!memory.is_semantic_duplicate("ok!", &scope, 0.5).await);
    }

    #[tokio::test]
    async fn identical_content_is_a_duplicate() {
        let (_store, memory) = setup();
        let scope = memory.agent_scope();
        let text = "Stoic practice is mostly about attention";
        memory
            .adapter()
            .add(&scope, text, MessageRole::Assistant, Metadata::new())
            .await;
        assert!(memory.is_semantic_duplicate(text, &scope, 0.85).await);
        assert!(
            !memory
                .is_semantic_duplicate(text, &MemoryScope::Participant("x".into()), 0.85)
                .await
        );
    }

    #[tokio::test]
    async fn read_errors_are_not_duplicates() {
        let (store, memory) = setup();
        store.set_fail_reads(true);
        let scope = memory.agent_scope();
        assert!(
            !memory
                .is_semantic_duplicate("long enough content here", &scope, 0.1)
                .await
        );
        assert!(!memory.has_exact_id("42", &[scope], 200).await);
    }

    #[tokio::test]
    async fn interaction_writes_three_records() {
        let (store, memory) = setup();
        let record = memory
            .record_interaction(
                "Totally agree, the morning walk resets everything",
                "Anyone else walk before work?",
                Some("1001"),
                Some("participant_bob"),
                "reply",
            )
            .await;
        assert!(record.participant_id.is_some());
        assert!(record.response_id.is_some());
        assert!(record.summary_id.is_some());
        assert!(record.errors.is_empty());
        assert_eq!(store.len().await, 3);

        let summaries = memory
            .adapter()
            .list_all(&memory.agent_scope(), 10)
            .await
            .unwrap();
        let summary = summaries
            .iter()
            .find(|e| e.metadata.get(KEY_ABOUT) == Some(&json!("participant_summary")))
            .unwrap();
        assert!(summary.content.starts_with("[participant_bob] "));
    }

    #[tokio::test]
    async fn interaction_without_participant_writes_response_only() {
        let (store, memory) = setup();
        let record = memory
            .record_interaction("A thought about tea", "Original post about tea", Some("77"), None, "post")
            .await;
        assert!(record.response_id.is_some());
        assert!(record.participant_id.is_none());
        assert!(record.summary_id.is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn summary_is_truncated() {
        let (_store, memory) = setup();
        let long_context = "word ".repeat(200);
        let record = memory
            .record_interaction("reply text here", &long_context, Some("5"), Some("participant_ann"), "reply")
            .await;
        let entries = memory
            .adapter()
            .list_all(&memory.agent_scope(), 10)
            .await
            .unwrap();
        let summary = entries
            .iter()
            .find(|e| Some(&e.id) == record.summary_id.as_ref())
            .unwrap();
        assert!(summary.content.chars().count() <= 300);
    }

    #[tokio::test]
    async fn write_failures_are_collected() {
        let (store, memory) = setup();
        store.set_fail_writes(true);
        let record = memory
            .record_interaction("reply text here", "some context text", Some("5"), Some("participant_ann"), "reply")
            .await;
        assert!(!record.wrote_any());
        assert_eq!(record.errors.len(), 3);
    }

    #[tokio::test]
    async fn observe_is_guarded_by_item_id() {
        let (store, memory) = setup();
        assert!(memory.observe("hello world from bob", Some("42"), Some("bob")).await.is_some());
        assert!(memory.observe("hello world from bob", Some("42"), Some("bob")).await.is_none());
        assert_eq!(store.len().await, 1);

        let listed = memory
            .adapter()
            .list_all(&MemoryScope::Participant("participant_bob".into()), 10)
            .await
            .unwrap();
        assert_eq!(listed[0].memory_type, MemoryType::Observation);
    }

    #[tokio::test]
    async fn skipped_records_are_flagged() {
        let (_store, memory) = setup();
        let long = "x".repeat(300);
        memory.record_skipped(&long, "9", "content_filtered").await.unwrap();
        assert!(memory.record_skipped(&long, "9", "content_filtered").await.is_none());

        let entries = memory
            .adapter()
            .list_all(&memory.agent_scope(), 10)
            .await
            .unwrap();
        assert!(entries[0].is_skipped());
        assert_eq!(entries[0].content.chars().count(), 100);
        assert_eq!(entries[0].metadata[KEY_SKIP_REASON], json!("content_filtered"));
    }

    #[tokio::test]
    async fn mark_skipped_patches_metadata() {
        let (_store, memory) = setup();
        let id = memory.observe("a plain observation", Some("3"), None).await.unwrap();
        assert!(memory.mark_skipped(&id, "off_topic").await);
        assert!(!memory.mark_skipped("missing", "off_topic").await);
    }
}
