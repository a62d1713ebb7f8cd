//! Cross-scope retrieval and prompt context assembly.

use std::cmp::Ordering;
use std::collections::HashMap;

use tracing::{debug, warn};

use crate::agent::AgentMemory;
use crate::types::{MemoryEntry, MemoryScope, MemoryStats, MemoryType, MetadataFilter};

/// Upper bound on entries pulled per scope for recency listings.
const LIST_CAP: usize = 1000;

/// Extra candidates requested per scope so filtering still leaves enough.
const SEARCH_HEADROOM: usize = 3;

/// Merge result sets, keeping the first occurrence of each id and the best
/// score seen for it.
pub fn merge_by_id(batches: Vec<Vec<MemoryEntry>>) -> Vec<MemoryEntry> {
    let mut merged: Vec<MemoryEntry> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for entry in batches.into_iter().flatten() {
        match index.get(&entry.id) {
            Some(&pos) => {
                let existing = &mut merged[pos];
                if entry.relevance_score > existing.relevance_score {
                    existing.relevance_score = entry.relevance_score;
                }
            }
            None => {
                index.insert(entry.id.clone(), merged.len());
                merged.push(entry);
            }
        }
    }
    merged
}

fn by_relevance_then_recency(a: &MemoryEntry, b: &MemoryEntry) -> Ordering {
    let sa = a.relevance_score.unwrap_or(0.0);
    let sb = b.relevance_score.unwrap_or(0.0);
    sb.partial_cmp(&sa)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.created_at.cmp(&a.created_at))
}

fn render_context(entries: &[MemoryEntry]) -> String {
    if entries.is_empty() {
        return String::new();
    }
    let mut out = String::from("Relevant memories:");
    for entry in entries {
        out.push_str(&format!("\n- [{}] {}", entry.memory_type, entry.content));
    }
    out
}

impl AgentMemory {
    async fn search_scopes(&self, query: &str, scopes: &[MemoryScope], limit: usize) -> Vec<Vec<MemoryEntry>> {
        let mut batches = Vec::with_capacity(scopes.len());
        for scope in scopes {
            match self.adapter.search(query, scope, limit).await {
                Ok(entries) => batches.push(entries),
                Err(e) => warn!(scope = %scope, error = %e, "Memory search failed"),
            }
        }
        batches
    }

    async fn list_own(&self, filter: &MetadataFilter, limit: usize) -> Vec<MemoryEntry> {
        let mut batches = Vec::new();
        for scope in self.own_scopes() {
            match self.adapter.list_matching(&scope, filter, limit).await {
                Ok(entries) => batches.push(entries),
                Err(e) => warn!(scope = %scope, error = %e, "Memory listing failed"),
            }
        }
        merge_by_id(batches)
    }

    /// Ranked, deduplicated entries for `query` across the agent's own
    /// scopes and, optionally, one participant scope. Skip-audit records are
    /// excluded.
    pub async fn search_entries(
        &self,
        query: &str,
        max_items: usize,
        min_relevance: f64,
        participant_id: Option<&str>,
    ) -> Vec<MemoryEntry> {
        let mut scopes = self.own_scopes().to_vec();
        if let Some(participant) = participant_id {
            let scope = MemoryScope::Participant(participant.to_string());
            if !scopes.contains(&scope) {
                scopes.push(scope);
            }
        }

        let batches = self
            .search_scopes(query, &scopes, max_items + SEARCH_HEADROOM)
            .await;
        let mut entries: Vec<MemoryEntry> = merge_by_id(batches)
            .into_iter()
            .filter(|e| !e.is_skipped())
            .collect();
        entries.sort_by(by_relevance_then_recency);
        entries.retain(|e| e.relevance_score.unwrap_or(0.0) >= min_relevance);
        entries.truncate(max_items);
        entries
    }

    /// Prompt-ready context block, or an empty string when nothing qualifies.
    pub async fn search_context(
        &self,
        query: &str,
        max_items: usize,
        min_relevance: f64,
        participant_id: Option<&str>,
    ) -> String {
        let entries = self
            .search_entries(query, max_items, min_relevance, participant_id)
            .await;
        debug!(count = entries.len(), participant = ?participant_id, "Assembled memory context");
        render_context(&entries)
    }

    /// Most recent own entries, newest first.
    pub async fn get_recent(&self, limit: usize, memory_type: Option<MemoryType>) -> Vec<MemoryEntry> {
        let filter = match memory_type {
            Some(kind) => MetadataFilter::new().memory_type(kind),
            None => MetadataFilter::new(),
        };
        let mut entries = self.list_own(&filter, LIST_CAP).await;
        // listings come oldest first; reversing keeps newer entries ahead on timestamp ties
        entries.reverse();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(limit);
        entries
    }

    /// Whether a recent interaction record already references `item_id`.
    pub async fn has_interacted(&self, item_id: &str) -> bool {
        self.has_interacted_within(item_id, self.interaction_scan_limit)
            .await
    }

    /// Scans the `scan_limit` newest interaction records per own scope. The
    /// type filter runs in the backend, so skip audits, reflections and
    /// observations never crowd interactions out of the window.
    pub async fn has_interacted_within(&self, item_id: &str, scan_limit: usize) -> bool {
        let filter = MetadataFilter::new().memory_type(MemoryType::Interaction);
        let mut found = false;
        for scope in self.own_scopes() {
            match self.adapter.list_matching(&scope, &filter, scan_limit).await {
                Ok(entries) => {
                    found = entries.iter().any(|e| e.post_id() == Some(item_id));
                }
                Err(e) => warn!(scope = %scope, item_id, error = %e, "Interaction scan failed"),
            }
            if found {
                break;
            }
        }
        found
    }

    pub async fn get_stats(&self) -> MemoryStats {
        let entries = self.list_own(&MetadataFilter::new(), LIST_CAP).await;
        let mut stats = MemoryStats {
            total_memories: entries.len(),
            ..Default::default()
        };
        for entry in &entries {
            *stats
                .by_type
                .entry(entry.memory_type.as_str().to_string())
                .or_default() += 1;
        }
        stats
    }
}
