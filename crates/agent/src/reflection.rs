//! Higher-level insights distilled from recent memories.

use std::sync::Arc;

use anima_common::{Clock, Result};
use anima_llm::{GenerativeService, Prompt, Task};
use anima_memory::{AgentMemory, MemoryEntry, MemoryType};
use chrono::Duration;
use tracing::{debug, info, warn};

/// Entries inspected when deciding whether to reflect.
const RECENT_WINDOW: usize = 50;
const MIN_NEW_ENTRIES: usize = 10;
const MIN_HOURS_BETWEEN: i64 = 12;

const DAILY_FOCUS: &str = "1. What patterns do you notice in your interactions?\n\
2. What topics came up frequently?\n\
3. What did you learn about the community?\n\
4. Any thoughts or feelings about your day?\n\
5. Are there topics you want to explore more?";

pub struct ReflectionEngine {
    memory: Arc<AgentMemory>,
    service: Arc<dyn GenerativeService>,
    clock: Arc<dyn Clock>,
    persona_name: String,
    system_prompt: String,
}

fn format_entries(entries: &[MemoryEntry]) -> String {
    entries
        .iter()
        .map(|e| {
            format!(
                "[{}] ({}) {}",
                e.created_at.format("%Y-%m-%d %H:%M"),
                e.memory_type,
                e.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl ReflectionEngine {
    pub fn new(
        memory: Arc<AgentMemory>,
        service: Arc<dyn GenerativeService>,
        clock: Arc<dyn Clock>,
        persona_name: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            memory,
            service,
            clock,
            persona_name: persona_name.into(),
            system_prompt: system_prompt.into(),
        }
    }

    /// Never reflected: reflect once 10 entries exist. Otherwise wait 12h and
    /// 10 entries newer than the last reflection.
    pub async fn should_reflect(&self) -> bool {
        let recent = self.memory.get_recent(RECENT_WINDOW, None).await;
        let Some(last) = recent
            .iter()
            .find(|e| e.memory_type == MemoryType::Reflective)
        else {
            return recent.len() >= MIN_NEW_ENTRIES;
        };

        if self.clock.now() - last.created_at < Duration::hours(MIN_HOURS_BETWEEN) {
            return false;
        }
        let newer = recent
            .iter()
            .filter(|e| e.created_at > last.created_at)
            .count();
        newer >= MIN_NEW_ENTRIES
    }

    /// Reflect on the last `hours` of memories. Returns `None` when fewer than
    /// `min_memories` qualify; a failed model call is an error.
    pub async fn generate_daily_reflection(&self, hours: i64, min_memories: usize) -> Result<Option<String>> {
        let cutoff = self.clock.now() - Duration::hours(hours);
        let relevant: Vec<MemoryEntry> = self
            .memory
            .get_recent(RECENT_WINDOW, None)
            .await
            .into_iter()
            .filter(|e| e.created_at > cutoff)
            .collect();

        if relevant.len() < min_memories {
            info!(
                found = relevant.len(),
                required = min_memories,
                "Skipping reflection, not enough memories"
            );
            return Ok(None);
        }

        let user = format!(
            "As {name}, reflect on your recent experiences:\n\n\
             {memories}\n\n---\n\n{DAILY_FOCUS}\n\n\
             Generate 3-5 high-level insights that capture the essence of these experiences.\n\
             Write in first person, as if you're journaling your thoughts.\n\
             Be specific but concise.",
            name = self.persona_name,
            memories = format_entries(&relevant),
        );
        let prompt = Prompt::new(Task::Reflection, self.system_prompt.clone(), user)
            .with_temperature(0.7)
            .with_max_tokens(500);

        let reflection = self.service.generate(prompt).await?;
        let reflection = reflection.trim();
        if reflection.is_empty() {
            return Ok(None);
        }

        let based_on: Vec<String> = relevant.iter().map(|e| e.id.clone()).collect();
        let stored = self.memory.add_reflection(reflection, &based_on).await;
        info!(
            length = reflection.chars().count(),
            based_on = based_on.len(),
            stored = stored.is_some(),
            "Daily reflection generated"
        );
        Ok(Some(reflection.to_string()))
    }

    /// Short reflection after an interaction. Failures are logged and dropped.
    pub async fn generate_interaction_reflection(&self, response: &str, context: &str) -> Option<String> {
        let user = format!(
            "As {name}, briefly reflect on this interaction:\n\n\
             Context: {context}\n\
             Your response: {response}\n\n\
             In 1-2 sentences, note any important insight or observation from this exchange.\n\
             Consider: What did you learn? How does this fit with your existing views?",
            name = self.persona_name,
        );
        let prompt = Prompt::new(Task::Reflection, self.system_prompt.clone(), user)
            .with_temperature(0.7)
            .with_max_tokens(150);

        match self.service.generate(prompt).await {
            Ok(text) if !text.trim().is_empty() => {
                let text = text.trim().to_string();
                self.memory
                    .add_reflection(&format!("After interaction: {text}"), &[])
                    .await;
                debug!("Interaction reflection generated");
                Some(text)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Interaction reflection failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anima_common::{FixedClock, LlmError};
    use anima_llm::ScriptedGenerativeService;
    use anima_memory::{HashingEmbedder, InMemoryStore};
    use chrono::{TimeZone, Utc};

    struct Fixture {
        clock: Arc<FixedClock>,
        memory: Arc<AgentMemory>,
        service: Arc<ScriptedGenerativeService>,
        engine: ReflectionEngine,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 5, 10, 8, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryStore::new(Arc::new(HashingEmbedder::default())));
        let memory = Arc::new(AgentMemory::new(store, clock.clone(), "mika"));
        let service = Arc::new(ScriptedGenerativeService::new());
        let engine = ReflectionEngine::new(
            memory.clone(),
            service.clone(),
            clock.clone(),
            "Mika",
            "You are Mika.",
        );
        Fixture {
            clock,
            memory,
            service,
            engine,
        }
    }

    async fn observe_n(f: &Fixture, n: usize, offset: usize) {
        for i in 0..n {
            let id = (offset + i).to_string();
            f.memory
                .observe(&format!("observation number {id} about tea"), Some(&id), None)
                .await;
            f.clock.advance(Duration::minutes(1));
        }
    }

    #[tokio::test]
    async fn first_reflection_needs_ten_entries() {
        let f = fixture();
        observe_n(&f, 9, 0).await;
        assert!(!f.engine.should_reflect().await);
        observe_n(&f, 1, 9).await;
        assert!(f.engine.should_reflect().await);
    }

    #[tokio::test]
    async fn later_reflections_need_time_and_new_entries() {
        let f = fixture();
        f.memory
            .add_reflection("I keep coming back to slow rituals", &[])
            .await
            .unwrap();
        f.clock.advance(Duration::minutes(1));
        observe_n(&f, 12, 0).await;
        assert!(!f.engine.should_reflect().await, "too soon");

        f.clock.advance(Duration::hours(12));
        assert!(f.engine.should_reflect().await);
    }

    #[tokio::test]
    async fn daily_reflection_stores_insights() {
        let f = fixture();
        observe_n(&f, 6, 0).await;
        f.service
            .push_text(Task::Reflection, "People here love quiet hobbies.");

        let reflection = f.engine.generate_daily_reflection(24, 5).await.unwrap();
        assert_eq!(reflection.as_deref(), Some("People here love quiet hobbies."));

        let reflections = f.memory.get_recent(10, Some(MemoryType::Reflective)).await;
        assert_eq!(reflections.len(), 1);
        let based_on = reflections[0].metadata["based_on_memories"].as_array().unwrap();
        assert_eq!(based_on.len(), 6);

        let prompt = f.service.prompts().pop().unwrap();
        assert!(prompt.user.contains("(observation) observation number 0 about tea"));
    }

    #[tokio::test]
    async fn daily_reflection_skips_when_sparse() {
        let f = fixture();
        observe_n(&f, 3, 0).await;
        assert!(f.engine.generate_daily_reflection(24, 5).await.unwrap().is_none());
        assert_eq!(f.service.calls_for(Task::Reflection), 0);
    }

    #[tokio::test]
    async fn daily_reflection_surfaces_model_errors() {
        let f = fixture();
        observe_n(&f, 6, 0).await;
        f.service.push_text_error(Task::Reflection, LlmError::Timeout("slow".into()));
        assert!(f.engine.generate_daily_reflection(24, 5).await.is_err());
    }

    #[tokio::test]
    async fn interaction_reflection_swallows_errors() {
        let f = fixture();
        f.service.push_text_error(Task::Reflection, LlmError::Timeout("slow".into()));
        assert!(
            f.engine
                .generate_interaction_reflection("my reply", "their post")
                .await
                .is_none()
        );

        let text = f
            .engine
            .generate_interaction_reflection("my reply", "their post")
            .await
            .unwrap();
        assert_eq!(text, "scripted reflection");
        let stored = f.memory.get_recent(5, Some(MemoryType::Reflective)).await;
        assert_eq!(stored[0].content, "After interaction: scripted reflection");
    }
}
