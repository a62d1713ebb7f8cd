//! End-to-end cycle scenarios over the in-memory collaborators.
//!
//! Pacing is zeroed and post-interaction reflections disabled so every
//! scenario is deterministic; backoff sleeps run on paused tokio time.

use std::sync::Arc;

use anima_agent::{
    AgentSettings, Collaborators, CycleController, CycleState, MemoryMetricsSink, Persona,
    SharedAgent, SimulationLogger, reason,
};
use anima_common::{CandidateItem, Clock, FixedClock, LlmError, PlatformError};
use anima_llm::{ScriptedGenerativeService, Task};
use anima_memory::{AgentMemory, HashingEmbedder, InMemoryStore, MemoryScope, MemoryType};
use anima_platform::{MockPlatform, QuotaStatus};
use chrono::{Duration, NaiveDate, TimeZone, Utc};

struct Harness {
    platform: Arc<MockPlatform>,
    service: Arc<ScriptedGenerativeService>,
    memory: Arc<AgentMemory>,
    metrics: Arc<MemoryMetricsSink>,
    clock: Arc<FixedClock>,
}

fn settings() -> AgentSettings {
    AgentSettings {
        agent_id: "mika".into(),
        pacing_min_secs: 0,
        pacing_max_secs: 0,
        reflection_chance: 0.0,
        ..Default::default()
    }
}

fn persona() -> Persona {
    let mut persona = Persona::named("Mika");
    persona.personality.traits = vec!["curious".into(), "wry".into()];
    persona.interests.primary = vec!["tea".into(), "film photography".into()];
    persona
}

impl Harness {
    fn new() -> Self {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryStore::new(Arc::new(HashingEmbedder::default())));
        Self {
            platform: Arc::new(MockPlatform::new("mika")),
            service: Arc::new(ScriptedGenerativeService::new()),
            memory: Arc::new(AgentMemory::new(store, clock.clone(), "mika")),
            metrics: Arc::new(MemoryMetricsSink::new()),
            clock,
        }
    }

    fn controller_with(&self, settings: AgentSettings, persona: Persona) -> CycleController {
        CycleController::new(
            settings,
            persona,
            Collaborators {
                platform: self.platform.clone(),
                generative: self.service.clone(),
                memory: self.memory.clone(),
                metrics: self.metrics.clone(),
                clock: self.clock.clone(),
            },
        )
    }

    fn controller(&self) -> CycleController {
        self.controller_with(settings(), persona())
    }

    async fn interactions_for(&self, item_id: &str) -> usize {
        self.memory
            .get_recent(500, Some(MemoryType::Interaction))
            .await
            .iter()
            .filter(|e| e.post_id() == Some(item_id))
            .count()
    }
}

fn item(id: &str, author: &str, text: &str) -> CandidateItem {
    CandidateItem::new(id, text).with_author(author)
}

#[tokio::test(start_paused = true)]
async fn test_skip_decline_and_engage() {
    let h = Harness::new();
    h.memory
        .record_interaction(
            "Oolong deserves more love than it gets",
            "alice asked which oolong to start with",
            Some("101"),
            Some("participant_alice"),
            "reply",
        )
        .await;
    let seeded = h.interactions_for("101").await;

    h.service.push_text(Task::Engagement, "NO not for me");
    h.service.push_score(0.9);

    let mut controller = h.controller();
    let results = controller
        .run_cycle(Some(vec![
            item("101", "alice", "Which oolong should a beginner try first?"),
            item("102", "bob", "Quarterly earnings look rough this year"),
            item("103", "carol", "Does anyone cold brew their tea overnight?"),
        ]))
        .await;

    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert_eq!(results[0].item_id, "103");
    assert_eq!(results[0].reason, reason::SUCCESS);
    assert_eq!(h.platform.reply_calls(), 1);
    assert_eq!(h.platform.replies()[0].reply_to.as_deref(), Some("103"));

    assert_eq!(h.interactions_for("101").await, seeded);
    // response and participant summary in the agent's own scope
    assert_eq!(h.interactions_for("103").await, 2);
    let carol = h
        .memory
        .adapter()
        .list_all(&MemoryScope::Participant("participant_carol".into()), 100)
        .await
        .unwrap();
    assert_eq!(
        carol
            .iter()
            .filter(|e| e.memory_type == MemoryType::Interaction && e.post_id() == Some("103"))
            .count(),
        1
    );

    let metrics = h.metrics.last().unwrap();
    assert_eq!(metrics.successful, 1);
    assert_eq!(metrics.attempts, 1);
    assert_eq!(metrics.skip_by_reason["already_interacted"], 1);
    assert_eq!(metrics.skip_by_reason["declined"], 1);
    assert_eq!(metrics.interactions_today, 1);
}

#[tokio::test(start_paused = true)]
async fn test_refinement_happens_once() {
    let h = Harness::new();
    h.service
        .push_text(Task::Response, "tea is nice i guess")
        .push_text(Task::Refinement, "Honestly? A slow pot of tea fixes most afternoons")
        .push_score(0.4)
        .push_score(0.8);

    let mut controller = h.controller();
    let results = controller
        .run_cycle(Some(vec![item("201", "dana", "What tea gets you through the afternoon?")]))
        .await;

    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert!(result.success);
    assert_eq!(result.refinement_count, 1);
    assert_eq!(result.adherence_score, Some(0.8));
    assert_eq!(
        result.response.as_deref(),
        Some("Honestly? A slow pot of tea fixes most afternoons")
    );
    assert_eq!(h.service.calls_for(Task::Refinement), 1);
    assert_eq!(
        h.platform.replies()[0].text,
        "Honestly? A slow pot of tea fixes most afternoons"
    );

    let stored = h.memory.get_recent(10, Some(MemoryType::Interaction)).await;
    assert!(
        stored
            .iter()
            .any(|e| e.content == "Honestly? A slow pot of tea fixes most afternoons")
    );
}

#[tokio::test(start_paused = true)]
async fn test_second_adherence_failure_is_terminal() {
    let h = Harness::new();
    h.service.push_score(0.3).push_score(0.2);

    let mut controller = h.controller();
    let results = controller
        .run_cycle(Some(vec![item("202", "dana", "Green tea or black tea in the morning?")]))
        .await;

    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert_eq!(results[0].reason, reason::ADHERENCE_FAILED);
    assert_eq!(results[0].refinement_count, 1);
    assert_eq!(h.service.calls_for(Task::Refinement), 1);
    assert_eq!(h.platform.reply_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_transient_publish_errors_are_retried() {
    let h = Harness::new();
    h.platform.queue_reply_failures([
        PlatformError::with_status("service unavailable", 503),
        PlatformError::with_status("service unavailable", 503),
    ]);

    let mut controller = h.controller();
    let results = controller
        .run_cycle(Some(vec![item("301", "erin", "Film photography in the rain, yes or no?")]))
        .await;

    assert_eq!(h.platform.reply_calls(), 3);
    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert!(results[0].reply_id.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_permanent_publish_error_is_not_retried() {
    let h = Harness::new();
    h.platform
        .queue_reply_failures([PlatformError::with_status("bad request", 400)]);

    let mut controller = h.controller();
    let results = controller
        .run_cycle(Some(vec![item("302", "erin", "Best tea for a cold evening?")]))
        .await;

    assert_eq!(h.platform.reply_calls(), 1);
    assert!(!results[0].success);
    assert!(results[0].reason.contains("bad request"));
    assert_eq!(h.interactions_for("302").await, 0);
    assert_eq!(controller.state().interactions_today, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cycle_stops_at_cap() {
    let h = Harness::new();
    let mut settings = settings();
    settings.max_interactions_per_cycle = 3;
    let mut controller = h.controller_with(settings, persona());

    let topics = [
        "jasmine tea", "sencha tea", "pu-erh tea", "rooibos tea", "matcha tea", "chai tea",
        "earl grey tea",
    ];
    let items = topics
        .iter()
        .enumerate()
        .map(|(i, topic)| {
            item(
                &(400 + i).to_string(),
                &format!("user{i}"),
                &format!("Thoughts on {topic} for slow weekends?"),
            )
        })
        .collect();

    let results = controller.run_cycle(Some(items)).await;

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.success));
    assert_eq!(h.platform.reply_calls(), 3);
    assert_eq!(h.service.calls_for(Task::Response), 3);
    assert_eq!(controller.state().interactions_today, 3);
}

#[tokio::test(start_paused = true)]
async fn test_same_item_is_never_published_twice() {
    let h = Harness::new();
    let mut controller = h.controller();
    let candidate = item("501", "fay", "How long do you steep white tea?");

    let first = controller.run_cycle(Some(vec![candidate.clone()])).await;
    assert_eq!(first.len(), 1);
    assert!(first[0].success);

    let second = controller.run_cycle(Some(vec![candidate])).await;
    assert!(second.is_empty());
    assert_eq!(h.platform.reply_calls(), 1);
    assert_eq!(h.service.calls_for(Task::Response), 1);

    let metrics = h.metrics.last().unwrap();
    assert_eq!(metrics.skip_by_reason["already_interacted"], 1);
}

#[tokio::test(start_paused = true)]
async fn test_own_posts_are_skipped() {
    let h = Harness::new();
    let mut controller = h.controller();
    let results = controller
        .run_cycle(Some(vec![item("502", "Mika", "My new tea shelf is finally done")]))
        .await;

    assert!(results.is_empty());
    assert_eq!(h.service.calls_for(Task::Engagement), 0);
    assert_eq!(h.metrics.last().unwrap().skip_by_reason["self_authored"], 1);
}

#[tokio::test(start_paused = true)]
async fn test_daily_counter_resets() {
    let h = Harness::new();
    let yesterday = NaiveDate::from_ymd_opt(2026, 3, 31).unwrap();
    let mut controller = h.controller().with_state(CycleState {
        last_reset_date: yesterday,
        interactions_today: 7,
        last_interaction: None,
    });

    controller
        .run_cycle(Some(vec![item("601", "gus", "Any tea that pairs well with rainy days?")]))
        .await;

    let state = controller.state();
    assert_eq!(state.interactions_today, 1);
    assert_eq!(state.last_reset_date, NaiveDate::from_ymd_opt(2026, 4, 1).unwrap());
    assert_eq!(state.last_interaction, Some(h.clock.now()));
}

#[tokio::test(start_paused = true)]
async fn test_counter_carries_within_a_day() {
    let h = Harness::new();
    let mut controller = h.controller();
    controller
        .run_cycle(Some(vec![item("602", "gus", "Tea before bed, good idea?")]))
        .await;
    h.clock.advance(Duration::hours(3));
    controller
        .run_cycle(Some(vec![item("603", "hana", "Which film photography stock for portraits?")]))
        .await;
    assert_eq!(controller.state().interactions_today, 2);

    h.clock.advance(Duration::days(1));
    controller.run_cycle(Some(Vec::new())).await;
    assert_eq!(controller.state().interactions_today, 0);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_reply_quota_returns_nothing() {
    let h = Harness::new();
    h.platform.exhaust_reply_quota();

    let mut controller = h.controller();
    let results = controller
        .run_cycle(Some(vec![item("701", "ivy", "Tea recommendations please!")]))
        .await;

    assert!(results.is_empty());
    assert_eq!(h.service.calls_for(Task::Engagement), 0);
    assert_eq!(h.service.calls_for(Task::Response), 0);
    assert!(h.metrics.records().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_deleted_target_is_not_published() {
    let h = Harness::new();
    h.platform.delete_post("801");

    let mut controller = h.controller();
    let results = controller
        .run_cycle(Some(vec![item("801", "jo", "Is tea better loose leaf or bagged?")]))
        .await;

    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert_eq!(results[0].reason, reason::TARGET_DELETED);
    assert_eq!(h.platform.reply_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shortcode_resolved_through_search() {
    let h = Harness::new();
    let text = "Rainy day film photography walk, who is in?";
    h.platform
        .set_search_results(text, vec![item("9001", "kai", text)]);

    let mut controller = h.controller();
    let results = controller
        .run_cycle(Some(vec![item("DR9xKq2", "kai", text)]))
        .await;

    assert!(results[0].success);
    assert_eq!(h.platform.replies()[0].reply_to.as_deref(), Some("9001"));
}

#[tokio::test(start_paused = true)]
async fn test_unresolvable_shortcode_fails_resolution() {
    let h = Harness::new();
    let mut controller = h.controller();
    let results = controller
        .run_cycle(Some(vec![item("ZZ8pQr1", "kai", "Matcha tea latte art attempt number four")]))
        .await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].reason, reason::RESOLVE_FAILED);
    assert_eq!(h.platform.reply_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_authorless_shortcode_is_observed_only() {
    let h = Harness::new();
    let mut controller = h.controller();
    let results = controller
        .run_cycle(Some(vec![CandidateItem::new(
            "QQ1aBc2",
            "Somebody brewed tea in a film canister",
        )]))
        .await;

    assert!(results.is_empty());
    assert_eq!(h.service.calls_for(Task::Response), 0);
    let observations = h.memory.get_recent(10, Some(MemoryType::Observation)).await;
    assert_eq!(observations.len(), 1);
    assert_eq!(observations[0].post_id(), Some("QQ1aBc2"));
    assert_eq!(h.metrics.last().unwrap().skip_by_reason["read_only"], 1);
}

#[tokio::test(start_paused = true)]
async fn test_observation_mode_never_publishes() {
    let h = Harness::new();
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings();
    settings.observation_mode = true;
    let mut controller = h
        .controller_with(settings, persona())
        .with_simulation_logger(SimulationLogger::new(dir.path(), h.clock.clone()));

    let results = controller
        .run_cycle(Some(vec![item("901", "lee", "Tea ceremony tips for beginners?")]))
        .await;

    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert_eq!(results[0].reason, reason::SIMULATED);
    assert!(results[0].reply_id.is_none());
    assert!(h.platform.published().is_empty());
    assert_eq!(h.interactions_for("901").await, 0);
    assert_eq!(h.metrics.last().unwrap().mode, "observe");

    let responses = std::fs::read_to_string(dir.path().join("responses.jsonl")).unwrap();
    let record: serde_json::Value = serde_json::from_str(responses.trim()).unwrap();
    assert_eq!(record["was_posted"], false);
    assert_eq!(record["post_id"], "901");
}

#[tokio::test(start_paused = true)]
async fn test_metrics_failure_does_not_fail_cycle() {
    let h = Harness::new();
    h.metrics.set_fail(true);

    let mut controller = h.controller();
    let results = controller
        .run_cycle(Some(vec![item("1001", "max", "Favourite tea for reading?")]))
        .await;

    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert!(h.metrics.records().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_item_errors_are_isolated() {
    let h = Harness::new();
    h.service
        .push_text_error(Task::Response, LlmError::Timeout("slow".into()));

    let mut controller = h.controller();
    let results = controller
        .run_cycle(Some(vec![
            item("1101", "nia", "Tea in a thermos, how long does it stay good?"),
            item("1102", "oli", "Film photography darkroom at home, worth it?"),
        ]))
        .await;

    assert_eq!(results.len(), 2);
    assert!(!results[0].success);
    assert!(results[1].success);
    assert_eq!(h.metrics.last().unwrap().attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_failure_aborts_cycle() {
    let h = Harness::new();
    h.platform
        .fail_fetch(PlatformError::with_status("upstream down", 502));
    h.platform
        .fail_search(PlatformError::with_status("upstream down", 502));

    let mut controller = h.controller();
    let results = controller.run_cycle(None).await;

    assert!(results.is_empty());
    assert_eq!(h.service.calls_for(Task::Engagement), 0);
    // setup aborts still emit a record
    assert_eq!(h.metrics.records().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_falls_back_to_interest_search() {
    let h = Harness::new();
    h.platform
        .fail_fetch(PlatformError::with_status("upstream down", 502));
    h.platform.set_search_results(
        "tea",
        vec![
            item("1201", "pia", "Iced tea season is here"),
            item("1201", "pia", "Iced tea season is here"),
        ],
    );

    let mut controller = h.controller();
    let results = controller.run_cycle(None).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].item_id, "1201");
}

#[tokio::test(start_paused = true)]
async fn test_reflection_failure_aborts_cycle() {
    let h = Harness::new();
    for i in 0..10 {
        h.memory
            .observe(&format!("observed tea post number {i}"), Some(&i.to_string()), None)
            .await;
        h.clock.advance(Duration::minutes(1));
    }
    h.service
        .push_text_error(Task::Reflection, LlmError::Timeout("slow".into()));

    let mut controller = h.controller();
    let results = controller
        .run_cycle(Some(vec![item("1301", "quinn", "Tea and rain, name a better duo")]))
        .await;

    assert!(results.is_empty());
    assert_eq!(h.platform.reply_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_daily_reflection_runs_before_items() {
    let h = Harness::new();
    for i in 0..10 {
        h.memory
            .observe(&format!("observed film post number {i}"), Some(&i.to_string()), None)
            .await;
        h.clock.advance(Duration::minutes(1));
    }

    let mut controller = h.controller();
    let results = controller
        .run_cycle(Some(vec![item("1302", "quinn", "Film photography on a budget?")]))
        .await;

    assert_eq!(results.len(), 1);
    assert_eq!(h.service.calls_for(Task::Reflection), 1);
    let reflections = h.memory.get_recent(5, Some(MemoryType::Reflective)).await;
    assert_eq!(reflections.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_original_post_strips_signature_from_memory() {
    let h = Harness::new();
    let mut persona = persona();
    persona.identity.signature = Some("~ Mika (bot)".into());
    h.service
        .push_text(Task::OriginalPost, "Brewed a tiny pot of oolong and watched the rain.");

    let mut controller = h.controller_with(settings(), persona);
    let post_id = controller.create_original_post(Some("tea")).await.unwrap();

    let published = h.platform.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].id, post_id);
    assert!(published[0].reply_to.is_none());
    assert!(published[0].text.ends_with("\n\n~ Mika (bot)"));

    let stored = h.memory.get_recent(10, Some(MemoryType::Interaction)).await;
    let entry = stored
        .iter()
        .find(|e| e.post_id() == Some(post_id.as_str()))
        .unwrap();
    assert_eq!(entry.content, "Brewed a tiny pot of oolong and watched the rain.");
}

#[tokio::test(start_paused = true)]
async fn test_original_post_respects_publish_quota() {
    let h = Harness::new();
    h.platform.set_quota(QuotaStatus {
        quota_usage: 250,
        quota_total: 250,
        ..Default::default()
    });

    let mut controller = h.controller();
    assert!(controller.create_original_post(None).await.is_none());
    assert_eq!(h.platform.create_calls(), 0);
    assert_eq!(h.service.calls_for(Task::OriginalPost), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shared_agent_serializes_cycles() {
    let h = Harness::new();
    let agent = SharedAgent::new(h.controller());
    let candidate = item("1401", "rae", "Cold brew tea or hot brew tea?");

    let (a, b) = tokio::join!(
        agent.run_cycle(Some(vec![candidate.clone()])),
        agent.run_cycle(Some(vec![candidate])),
    );

    assert_eq!(a.len() + b.len(), 1);
    assert_eq!(h.platform.reply_calls(), 1);
    let stats = agent.stats().await;
    assert_eq!(stats.agent_name, "Mika");
    assert_eq!(stats.interactions_today, 1);
}
