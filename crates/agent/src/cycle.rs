//! The interaction cycle: turn a batch of candidate items into at most
//! `max_interactions_per_cycle` published replies.
//!
//! ```text
//! run_cycle
//!   ├─ daily rollover
//!   ├─ reflection gate ──── error aborts the cycle
//!   ├─ reply quota gate ─── exhausted returns nothing
//!   ├─ fetch ────────────── error aborts the cycle
//!   └─ per item (sequential, errors isolated to the item)
//!        skip check → engagement → read-only check (observe only)
//!        → generate → adherence (+ one refinement)
//!        → resolve target → target exists → publish with retry
//!        → record interaction → maybe reflect → pacing
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anima_common::{AnimaError, CandidateItem, Clock, Result};
use anima_llm::GenerativeService;
use anima_memory::{AgentMemory, MemoryStats};
use anima_platform::PlatformClient;
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::config::AgentSettings;
use crate::metrics::{CycleMetrics, MetricsSink};
use crate::observation::{ResponseRecord, SimulationLogger};
use crate::persona::{Persona, PersonaEngine, is_simple_reaction, truncate_with_ellipsis};
use crate::publish::{PublishRetryConfig, describe, publish_with_retry};
use crate::reflection::ReflectionEngine;
use crate::state::CycleState;

const OWN_POSTS_TO_SCAN: usize = 10;
const REPLIES_PER_POST: usize = 5;
const INTEREST_QUERIES: usize = 3;
const SEARCH_LIMIT: usize = 10;
const MAX_CANDIDATES: usize = 20;
const RESOLVE_QUERY_CHARS: usize = 64;
const REACTION_CONTEXT_ITEMS: usize = 1;
const REPLY_CONTEXT_ITEMS: usize = 5;
const POST_CONTEXT_ITEMS: usize = 3;
const MAX_POST_CHARS: usize = 500;
const DAILY_REFLECTION_HOURS: i64 = 24;
const DAILY_REFLECTION_MIN_MEMORIES: usize = 5;

/// Machine-readable `InteractionResult::reason` codes.
pub mod reason {
    pub const SUCCESS: &str = "success";
    pub const SIMULATED: &str = "simulated";
    pub const ADHERENCE_FAILED: &str = "persona_adherence_failed";
    pub const RESOLVE_FAILED: &str = "resolve_post_id_failed";
    pub const TARGET_DELETED: &str = "reply_target_deleted";
}

/// Why an item never reached generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    SelfAuthored,
    AlreadyInteracted,
    ContentFiltered,
    Declined,
    ReadOnly,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::SelfAuthored => "self_authored",
            SkipReason::AlreadyInteracted => "already_interacted",
            SkipReason::ContentFiltered => "content_filtered",
            SkipReason::Declined => "declined",
            SkipReason::ReadOnly => "read_only",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response text after the verify-refine loop.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedResponse {
    pub text: String,
    pub adherence_score: f64,
    pub adherence_reason: Option<String>,
    /// Never more than 1
    pub refinement_count: u32,
    pub passes: bool,
}

/// Outcome of one item that reached the generation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionResult {
    pub success: bool,
    pub item_id: String,
    pub response: Option<String>,
    pub reason: String,
    pub adherence_score: Option<f64>,
    pub refinement_count: u32,
    pub reply_id: Option<String>,
}

impl InteractionResult {
    fn failed(item_id: &str, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            item_id: item_id.to_string(),
            response: None,
            reason: reason.into(),
            adherence_score: None,
            refinement_count: 0,
            reply_id: None,
        }
    }

    fn from_generated(item_id: &str, generated: &GeneratedResponse, success: bool, reason: &str) -> Self {
        Self {
            success,
            item_id: item_id.to_string(),
            response: Some(generated.text.clone()),
            reason: reason.to_string(),
            adherence_score: Some(generated.adherence_score),
            refinement_count: generated.refinement_count,
            reply_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    pub agent_name: String,
    pub interactions_today: u32,
    pub last_interaction: Option<DateTime<Utc>>,
    pub memory: MemoryStats,
}

/// Everything the controller talks to.
pub struct Collaborators {
    pub platform: Arc<dyn PlatformClient>,
    pub generative: Arc<dyn GenerativeService>,
    pub memory: Arc<AgentMemory>,
    pub metrics: Arc<dyn MetricsSink>,
    pub clock: Arc<dyn Clock>,
}

enum CycleOutcome {
    Completed,
    RateLimited,
}

/// Drives interaction cycles for one persona.
///
/// Not safe for concurrent cycles; wrap in [`crate::SharedAgent`] when more
/// than one trigger can fire.
pub struct CycleController {
    settings: AgentSettings,
    retry: PublishRetryConfig,
    platform: Arc<dyn PlatformClient>,
    persona: PersonaEngine,
    reflection: ReflectionEngine,
    memory: Arc<AgentMemory>,
    metrics: Arc<dyn MetricsSink>,
    simulation: Option<SimulationLogger>,
    clock: Arc<dyn Clock>,
    state: CycleState,
    self_username: Option<String>,
    clients_ready: bool,
}

impl CycleController {
    pub fn new(settings: AgentSettings, persona: Persona, collaborators: Collaborators) -> Self {
        let Collaborators {
            platform,
            generative,
            memory,
            metrics,
            clock,
        } = collaborators;

        let engine = PersonaEngine::new(persona, generative.clone(), settings.adherence_threshold);
        let reflection = ReflectionEngine::new(
            memory.clone(),
            generative,
            clock.clone(),
            engine.persona().name(),
            engine.system_prompt(),
        );
        let state = CycleState::new(clock.today());

        Self {
            settings,
            retry: PublishRetryConfig::default(),
            platform,
            persona: engine,
            reflection,
            memory,
            metrics,
            simulation: None,
            clock,
            state,
            self_username: None,
            clients_ready: false,
        }
    }

    pub fn with_publish_retry(mut self, retry: PublishRetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_simulation_logger(mut self, logger: SimulationLogger) -> Self {
        self.simulation = Some(logger);
        self
    }

    pub fn with_state(mut self, state: CycleState) -> Self {
        self.state = state;
        self
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn state(&self) -> &CycleState {
        &self.state
    }

    pub fn memory(&self) -> &Arc<AgentMemory> {
        &self.memory
    }

    pub fn set_observation_mode(&mut self, enabled: bool) {
        self.settings.observation_mode = enabled;
    }

    /// Run one cycle. Supplied `external_items` replace the fetch stage and
    /// are used verbatim. Never fails: setup errors end the cycle early and
    /// whatever was accumulated is returned.
    #[instrument(skip_all, fields(agent = %self.settings.agent_id, external = external_items.is_some()))]
    pub async fn run_cycle(&mut self, external_items: Option<Vec<CandidateItem>>) -> Vec<InteractionResult> {
        self.state = self.state.clone().rolled_over(self.clock.today());
        info!(
            interactions_today = self.state.interactions_today,
            observation_mode = self.settings.observation_mode,
            "Starting interaction cycle"
        );

        let mut metrics = CycleMetrics::new(
            self.clock.now(),
            self.settings.agent_id.clone(),
            self.settings.observation_mode,
        );
        let mut results = Vec::new();

        match self.process(external_items, &mut results, &mut metrics).await {
            Ok(CycleOutcome::Completed) => {}
            Ok(CycleOutcome::RateLimited) => {
                warn!("Reply quota exhausted, skipping cycle");
                return results;
            }
            Err(e) => {
                error!(error = %e, completed = results.len(), "Cycle aborted during setup");
            }
        }

        self.emit_metrics(metrics, &results).await;
        info!(
            attempts = results.len(),
            successful = results.iter().filter(|r| r.success).count(),
            interactions_today = self.state.interactions_today,
            "Interaction cycle finished"
        );
        results
    }

    async fn process(
        &mut self,
        external_items: Option<Vec<CandidateItem>>,
        results: &mut Vec<InteractionResult>,
        metrics: &mut CycleMetrics,
    ) -> Result<CycleOutcome> {
        let username = self.ensure_clients_ready().await?;

        if self.reflection.should_reflect().await {
            info!("Generating daily reflection");
            self.reflection
                .generate_daily_reflection(DAILY_REFLECTION_HOURS, DAILY_REFLECTION_MIN_MEMORIES)
                .await?;
        }

        if !self.platform.can_reply().await? {
            return Ok(CycleOutcome::RateLimited);
        }

        let items = match external_items {
            Some(items) => items,
            None => self.fetch_candidates().await?,
        };
        debug!(candidates = items.len(), "Processing candidates");

        let cap = self.settings.max_interactions_per_cycle;
        let mut successful = 0;
        for item in items {
            if successful >= cap {
                info!(cap, "Per-cycle interaction cap reached");
                break;
            }

            if let Some(skip) = self.skip_check(&item, &username).await {
                debug!(item_id = %item.id, reason = %skip, "Skipping item");
                metrics.record_skip(skip.as_str());
                continue;
            }

            if let Some(sim) = &self.simulation {
                sim.log_observation(&item).await;
            }

            let decision = match self.persona.should_engage(&item.text).await {
                Ok(decision) => decision,
                Err(e) => {
                    error!(item_id = %item.id, error = %e, "Engagement decision failed");
                    self.log_failure(&item, &e).await;
                    results.push(InteractionResult::failed(&item.id, e.to_string()));
                    continue;
                }
            };
            if let Some(sim) = &self.simulation {
                sim.log_decision(&item.id, &decision).await;
            }

            if !decision.engage {
                let skip = if decision.is_filtered() {
                    SkipReason::ContentFiltered
                } else {
                    SkipReason::Declined
                };
                debug!(item_id = %item.id, reason = %decision.reason, "Declined to engage");
                self.memory
                    .record_skipped(&item.text, &item.id, &decision.reason)
                    .await;
                metrics.record_skip(skip.as_str());
                continue;
            }

            if is_read_only(&item) {
                debug!(item_id = %item.id, "No publishable id, observing only");
                self.memory
                    .observe(&item.text, Some(&item.id), item.author.as_deref())
                    .await;
                metrics.record_skip(SkipReason::ReadOnly.as_str());
                continue;
            }

            let result = self.interact(&item).await;
            let published = result.success && result.reply_id.is_some();
            if result.success {
                successful += 1;
            }
            results.push(result);

            if published && successful < cap {
                self.pace().await;
            }
        }

        Ok(CycleOutcome::Completed)
    }

    /// Open the platform client once and cache our own username.
    async fn ensure_clients_ready(&mut self) -> Result<String> {
        if !self.clients_ready {
            self.platform.open().await?;
            self.clients_ready = true;
        }
        if let Some(username) = &self.self_username {
            return Ok(username.clone());
        }
        let profile = self.platform.get_user_profile().await?;
        debug!(username = %profile.username, "Cached own username");
        self.self_username = Some(profile.username.clone());
        Ok(profile.username)
    }

    async fn skip_check(&self, item: &CandidateItem, username: &str) -> Option<SkipReason> {
        if item.is_authored_by(username) {
            return Some(SkipReason::SelfAuthored);
        }
        if self.memory.has_interacted(&item.id).await {
            return Some(SkipReason::AlreadyInteracted);
        }
        None
    }

    /// Replies to our own posts first, then interest searches; deduplicated,
    /// shuffled and capped. Fails only when every source failed.
    async fn fetch_candidates(&self) -> Result<Vec<CandidateItem>> {
        let mut items = Vec::new();
        let mut primary_error = None;

        match self
            .platform
            .fetch_replies_to_own_posts(OWN_POSTS_TO_SCAN, REPLIES_PER_POST)
            .await
        {
            Ok(replies) => {
                debug!(count = replies.len(), "Fetched replies to own posts");
                items.extend(replies);
            }
            Err(e) => {
                warn!(error = %e, "Fetching replies to own posts failed");
                primary_error = Some(e);
            }
        }

        let mut searched = false;
        if items.len() < MAX_CANDIDATES {
            let interests = &self.persona.persona().interests.primary;
            for interest in interests.iter().take(INTEREST_QUERIES) {
                match self.platform.search(interest, SEARCH_LIMIT).await {
                    Ok(found) => {
                        searched = true;
                        items.extend(found);
                    }
                    Err(e) => debug!(query = %interest, error = %e, "Interest search failed"),
                }
            }
        }

        if let Some(e) = primary_error
            && !searched
        {
            return Err(AnimaError::Platform(e));
        }

        let mut seen = HashSet::new();
        items.retain(|item| seen.insert(item.id.clone()));
        items.shuffle(&mut rand::thread_rng());
        items.truncate(MAX_CANDIDATES);
        Ok(items)
    }

    /// Item-level pipeline. Errors become a failed result.
    async fn interact(&mut self, item: &CandidateItem) -> InteractionResult {
        match self.try_interact(item).await {
            Ok(result) => result,
            Err(e) => {
                error!(item_id = %item.id, error = %e, "Interaction failed");
                self.log_failure(item, &e).await;
                InteractionResult::failed(&item.id, e.to_string())
            }
        }
    }

    async fn try_interact(&mut self, item: &CandidateItem) -> Result<InteractionResult> {
        let participant = item.participant_id();
        let context_items = if is_simple_reaction(&item.text) {
            REACTION_CONTEXT_ITEMS
        } else {
            REPLY_CONTEXT_ITEMS
        };
        let memory_context = self
            .memory
            .search_context(
                &item.text,
                context_items,
                self.settings.min_relevance_score,
                participant.as_deref(),
            )
            .await;

        let generated = self.generate_verified(&item.text, &memory_context).await?;
        let mut record = ResponseRecord {
            timestamp: self.clock.now(),
            post_id: item.id.clone(),
            post_text: item.text.clone(),
            response: Some(generated.text.clone()),
            adherence_score: Some(generated.adherence_score),
            refinement_count: generated.refinement_count,
            ..Default::default()
        };

        if !generated.passes {
            info!(
                item_id = %item.id,
                score = generated.adherence_score,
                "Response failed persona adherence after refinement"
            );
            record.error = Some(reason::ADHERENCE_FAILED.to_string());
            self.log_response(&record).await;
            return Ok(InteractionResult::from_generated(
                &item.id,
                &generated,
                false,
                reason::ADHERENCE_FAILED,
            ));
        }

        if self.settings.observation_mode {
            info!(item_id = %item.id, "Observation mode, not publishing");
            self.log_response(&record).await;
            return Ok(InteractionResult::from_generated(
                &item.id,
                &generated,
                true,
                reason::SIMULATED,
            ));
        }

        let Some(target) = self.resolve_target_id(item).await else {
            warn!(item_id = %item.id, "Could not resolve a publishable post id");
            record.error = Some(reason::RESOLVE_FAILED.to_string());
            self.log_response(&record).await;
            return Ok(InteractionResult::from_generated(
                &item.id,
                &generated,
                false,
                reason::RESOLVE_FAILED,
            ));
        };

        match self.platform.get_post(&target).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                info!(item_id = %item.id, target = %target, "Reply target no longer exists");
                record.error = Some(reason::TARGET_DELETED.to_string());
                self.log_response(&record).await;
                return Ok(InteractionResult::from_generated(
                    &item.id,
                    &generated,
                    false,
                    reason::TARGET_DELETED,
                ));
            }
            Err(e) => return Err(e.into()),
        }

        let text = format!(
            "{}{}",
            generated.text,
            self.persona.persona().signature_suffix()
        );
        let platform = Arc::clone(&self.platform);
        let published = publish_with_retry(&self.retry, || {
            let platform = Arc::clone(&platform);
            let target = target.clone();
            let text = text.clone();
            async move { platform.reply_to_post(&target, &text).await }
        })
        .await;

        let reply_id = match published {
            Ok(id) => id,
            Err(e) => {
                error!(item_id = %item.id, kind = describe(&e), error = %e, "Publishing reply failed");
                record.error = Some(e.to_string());
                self.log_response(&record).await;
                return Ok(InteractionResult::from_generated(
                    &item.id,
                    &generated,
                    false,
                    &e.to_string(),
                ));
            }
        };

        let stored = self
            .memory
            .record_interaction(
                &generated.text,
                &item.text,
                Some(&item.id),
                participant.as_deref(),
                "reply",
            )
            .await;
        if !stored.errors.is_empty() {
            warn!(item_id = %item.id, errors = ?stored.errors, "Interaction partially recorded");
        }

        let now = self.clock.now();
        self.state = self.state.clone().with_interaction(now);
        info!(
            item_id = %item.id,
            reply_id = %reply_id,
            score = generated.adherence_score,
            refinements = generated.refinement_count,
            interactions_today = self.state.interactions_today,
            "Reply published"
        );

        if rand::random::<f64>() < self.settings.reflection_chance {
            self.reflection
                .generate_interaction_reflection(&generated.text, &item.text)
                .await;
        }

        record.was_posted = true;
        record.reply_id = Some(reply_id.clone());
        self.log_response(&record).await;

        let mut result = InteractionResult::from_generated(&item.id, &generated, true, reason::SUCCESS);
        result.reply_id = Some(reply_id);
        Ok(result)
    }

    /// Generate, check adherence, and refine at most once.
    pub async fn generate_verified(&self, context: &str, memory_context: &str) -> Result<GeneratedResponse> {
        let text = self.persona.generate_response(context, memory_context).await?;
        let check = self.persona.verify_adherence(&text).await?;
        if check.passes {
            return Ok(GeneratedResponse {
                text,
                adherence_score: check.score,
                adherence_reason: check.reason,
                refinement_count: 0,
                passes: true,
            });
        }

        debug!(score = check.score, "Adherence below threshold, refining");
        let refined = self
            .persona
            .refine_response(&text, check.reason.as_deref())
            .await?;
        let second = self.persona.verify_adherence(&refined).await?;
        Ok(GeneratedResponse {
            text: refined,
            adherence_score: second.score,
            adherence_reason: second.reason,
            refinement_count: 1,
            passes: second.passes,
        })
    }

    /// Map an observed item to an id the publish API accepts.
    async fn resolve_target_id(&self, item: &CandidateItem) -> Option<String> {
        if item.has_numeric_id() {
            return Some(item.id.clone());
        }

        match self.platform.get_post(&item.id).await {
            Ok(post) if post.has_numeric_id() => return Some(post.id),
            Ok(_) => {}
            Err(e) => debug!(item_id = %item.id, error = %e, "Direct lookup failed"),
        }

        let author = item.author.as_deref()?;
        let query: String = item.text.chars().take(RESOLVE_QUERY_CHARS).collect();
        let query = query.trim();
        if query.is_empty() {
            return None;
        }
        match self.platform.search(query, SEARCH_LIMIT).await {
            Ok(found) => found
                .into_iter()
                .find(|c| c.is_authored_by(author) && c.has_numeric_id())
                .map(|c| c.id),
            Err(e) => {
                warn!(item_id = %item.id, error = %e, "Search-based id resolution failed");
                None
            }
        }
    }

    async fn pace(&self) {
        if self.settings.observation_mode {
            return;
        }
        let min = self.settings.pacing_min_secs;
        let max = self.settings.pacing_max_secs.max(min);
        let secs = rand::thread_rng().gen_range(min..=max);
        if secs == 0 {
            return;
        }
        debug!(secs, "Pacing before next item");
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    async fn log_response(&self, record: &ResponseRecord) {
        if let Some(sim) = &self.simulation {
            sim.log_response(record).await;
        }
    }

    async fn log_failure(&self, item: &CandidateItem, error: &AnimaError) {
        let record = ResponseRecord {
            timestamp: self.clock.now(),
            post_id: item.id.clone(),
            post_text: item.text.clone(),
            error: Some(error.to_string()),
            ..Default::default()
        };
        self.log_response(&record).await;
    }

    async fn emit_metrics(&self, mut metrics: CycleMetrics, results: &[InteractionResult]) {
        metrics.attempts = results.len();
        metrics.successful = results.iter().filter(|r| r.success).count();
        for result in results {
            if let Some(score) = result.adherence_score {
                metrics.record_adherence(score, result.refinement_count);
            }
        }
        metrics.interactions_today = self.state.interactions_today;
        metrics.memory = self.memory.get_stats().await;

        if let Err(e) = self.metrics.record(&metrics).await {
            warn!(error = %e, "Failed to write cycle metrics");
        }
    }

    /// Publish a top-level post. Gated only by the publish quota.
    pub async fn create_original_post(&mut self, topic: Option<&str>) -> Option<String> {
        if let Err(e) = self.ensure_clients_ready().await {
            warn!(error = %e, "Platform unavailable, not posting");
            return None;
        }
        match self.platform.can_publish().await {
            Ok(true) => {}
            Ok(false) => {
                warn!("Publish quota exhausted, not posting");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Publish quota check failed");
                return None;
            }
        }

        let Some(topic) = topic.map(str::to_string).or_else(|| self.pick_topic()) else {
            warn!("No topic given and persona has no interests");
            return None;
        };

        let memory_context = self
            .memory
            .search_context(&topic, POST_CONTEXT_ITEMS, 0.0, None)
            .await;
        let content = match self.persona.compose_post(&topic, &memory_context).await {
            Ok(content) if !content.is_empty() => content,
            Ok(_) => {
                warn!(topic = %topic, "Empty post generated");
                return None;
            }
            Err(e) => {
                error!(topic = %topic, error = %e, "Post generation failed");
                return None;
            }
        };

        let persona = self.persona.persona();
        let suffix = persona.signature_suffix();
        let max_len = persona
            .interaction_rules
            .max_response_length
            .min(MAX_POST_CHARS)
            .saturating_sub(suffix.chars().count());
        let content = truncate_with_ellipsis(&content, max_len);

        if self.settings.observation_mode {
            info!(topic = %topic, content = %content, "Observation mode, not posting");
            return None;
        }

        let text = format!("{content}{suffix}");
        let platform = Arc::clone(&self.platform);
        let post_id = match publish_with_retry(&self.retry, || {
            let platform = Arc::clone(&platform);
            let text = text.clone();
            async move { platform.create_post(&text).await }
        })
        .await
        {
            Ok(id) => id,
            Err(e) => {
                error!(topic = %topic, kind = describe(&e), error = %e, "Publishing post failed");
                return None;
            }
        };

        self.memory
            .record_interaction(
                &content,
                &format!("Original post about {topic}"),
                Some(&post_id),
                None,
                "post",
            )
            .await;
        info!(post_id = %post_id, topic = %topic, "Original post published");
        Some(post_id)
    }

    fn pick_topic(&self) -> Option<String> {
        let interests = &self.persona.persona().interests;
        let pool = if interests.primary.is_empty() {
            &interests.secondary
        } else {
            &interests.primary
        };
        pool.choose(&mut rand::thread_rng()).cloned()
    }

    pub async fn agent_stats(&self) -> AgentStats {
        AgentStats {
            agent_name: self.persona.persona().name().to_string(),
            interactions_today: self.state.interactions_today,
            last_interaction: self.state.last_interaction,
            memory: self.memory.get_stats().await,
        }
    }

    pub async fn close(&mut self) {
        if self.clients_ready {
            if let Err(e) = self.platform.close().await {
                warn!(error = %e, "Closing platform client failed");
            }
            self.clients_ready = false;
        }
    }
}

/// Opaque shortcode with nobody to search by: nothing to reply to.
fn is_read_only(item: &CandidateItem) -> bool {
    !item.has_numeric_id() && item.author.as_deref().is_none_or(str::is_empty)
}
