//! Integration tests for the agent memory policy.
//!
//! These run against the in-memory backend with the hashing embedder, so
//! similarity scores are deterministic.

use std::collections::HashSet;
use std::sync::Arc;

use anima_common::FixedClock;
use anima_memory::{
    AgentMemory, HashingEmbedder, InMemoryStore, MemoryScope, MemoryType, Metadata, StoredRecord,
};
use chrono::{TimeZone, Utc};
use serde_json::json;

fn memory_with_store() -> (Arc<InMemoryStore>, AgentMemory) {
    let store = Arc::new(InMemoryStore::new(Arc::new(HashingEmbedder::default())));
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
    ));
    let memory = AgentMemory::new(store.clone(), clock, "mika");
    (store, memory)
}

#[tokio::test]
async fn test_merged_results_have_unique_ids() {
    let (store, memory) = memory_with_store();

    // Legacy record written under both identity keys
    let mut metadata = Metadata::new();
    metadata.insert("memory_type".into(), json!("interaction"));
    metadata.insert("timestamp".into(), json!("2026-02-28T10:00:00"));
    store
        .import(
            StoredRecord {
                id: "legacy_1".into(),
                content: "I wrote about slow mornings and film cameras".into(),
                metadata,
                score: None,
            },
            vec![
                MemoryScope::Agent("mika".into()),
                MemoryScope::Participant("mika".into()),
            ],
        )
        .await
        .unwrap();
    memory
        .observe("film cameras are making a comeback", Some("9"), None)
        .await
        .unwrap();

    let found = memory
        .search_entries("slow mornings and film cameras", 10, 0.0, None)
        .await;
    let ids: HashSet<_> = found.iter().map(|e| e.id.clone()).collect();
    assert_eq!(ids.len(), found.len());
    assert!(ids.contains("legacy_1"));

    let recent = memory.get_recent(10, None).await;
    let ids: HashSet<_> = recent.iter().map(|e| e.id.clone()).collect();
    assert_eq!(ids.len(), recent.len());
    assert_eq!(recent.len(), 2);

    let context = memory
        .search_context("slow mornings and film cameras", 10, 0.0, None)
        .await;
    assert_eq!(context.matches("slow mornings").count(), 1);
}

async fn suppressed_writes(threshold: f64, responses: &[&str]) -> usize {
    let (_store, memory) = memory_with_store();
    let memory = memory.with_dedup_threshold(threshold);
    let mut suppressed = 0;
    for (i, response) in responses.iter().enumerate() {
        let record = memory
            .record_interaction(response, "context", Some(&i.to_string()), None, "reply")
            .await;
        suppressed += record.skipped_duplicates;
    }
    suppressed
}

#[tokio::test]
async fn test_raising_threshold_never_suppresses_more() {
    let responses = [
        "Reading on the train is the best part of my day",
        "Reading on the train is the best part of my day",
        "Reading on the train is the best part of my whole day",
        "Reading on a train is the best part of the day honestly",
        "Gardening in spring always lifts my mood",
        "Gardening in the spring always lifts my mood",
    ];
    let loose = suppressed_writes(0.85, &responses).await;
    let strict = suppressed_writes(0.99, &responses).await;
    assert!(strict <= loose, "strict={strict} loose={loose}");
    // exact repeats are caught at either threshold
    assert!(strict >= 1);
}

#[tokio::test]
async fn test_partial_write_failure_is_reported() {
    let (store, memory) = memory_with_store();
    let first = memory
        .record_interaction(
            "Love this, sketching daily changed how I see streets",
            "Started an urban sketching habit this month",
            Some("100"),
            Some("participant_ines"),
            "reply",
        )
        .await;
    assert!(first.errors.is_empty());

    store.set_fail_writes(true);
    let second = memory
        .record_interaction(
            "Bread takes patience and flour everywhere",
            "My first sourdough collapsed",
            Some("101"),
            Some("participant_ines"),
            "reply",
        )
        .await;
    assert!(!second.wrote_any());
    assert_eq!(second.errors.len(), 3);

    store.set_fail_writes(false);
    assert!(memory.has_interacted("100").await);
    assert!(!memory.has_interacted("101").await);
}

#[tokio::test]
async fn test_reflection_and_interaction_types_are_listed() {
    let (_store, memory) = memory_with_store();
    memory
        .record_interaction(
            "The light in late autumn is unmatched",
            "Autumn photo walk today",
            Some("7"),
            Some("participant_ola"),
            "reply",
        )
        .await;
    memory
        .add_reflection(
            "People respond most when I share small concrete observations",
            &["mem_000001".to_string()],
        )
        .await
        .unwrap();

    let reflections = memory.get_recent(10, Some(MemoryType::Reflective)).await;
    assert_eq!(reflections.len(), 1);
    let interactions = memory.get_recent(10, Some(MemoryType::Interaction)).await;
    // response and participant summary; the participant's own text is in their scope
    assert_eq!(interactions.len(), 2);
}

#[tokio::test]
async fn test_interaction_survives_a_flood_of_skip_audits() {
    let store = Arc::new(InMemoryStore::new(Arc::new(HashingEmbedder::default())));
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
    ));
    let memory = AgentMemory::new(store.clone(), clock.clone(), "mika");

    memory
        .record_interaction(
            "Rainy days are for contact sheets and tea",
            "Spent the afternoon scanning negatives",
            Some("501"),
            None,
            "reply",
        )
        .await;
    assert!(memory.has_interacted("501").await);

    // more audits than the default interaction scan window
    for i in 0..250 {
        clock.advance(chrono::Duration::minutes(1));
        memory
            .record_skipped(&format!("off-topic post number {i}"), &format!("9{i:04}"), "declined")
            .await
            .unwrap();
    }

    assert!(memory.has_interacted("501").await);
    assert!(memory.record_skipped("seen before", "501", "declined").await.is_none());
    assert!(!memory.has_interacted("90001").await);
}
