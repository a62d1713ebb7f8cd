//! The generative-language capability the agent consumes.
//!
//! `GenerativeService` is deliberately narrow: prompt in, text or score out.
//! `LlmGenerativeService` backs it with two [`LlmClient`] stacks (standard and
//! advanced model); `ScriptedGenerativeService` replays queued answers for
//! tests and offline runs.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use anima_common::{LlmError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::{LlmClient, LlmRequest};
use crate::config::{LlmConfig, build_llm_client};

/// Score assigned when the scorer's answer cannot be parsed.
pub const NEUTRAL_SCORE: f64 = 0.5;

/// What a prompt is for. Lets fakes answer per purpose and shows up in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    Engagement,
    Response,
    Adherence,
    Refinement,
    Reflection,
    OriginalPost,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ModelTier {
    #[default]
    Standard,
    Advanced,
}

#[derive(Debug, Clone)]
pub struct Prompt {
    pub task: Task,
    pub system: String,
    pub user: String,
    pub tier: ModelTier,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Prompt {
    pub fn new(task: Task, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            task,
            system: system.into(),
            user: user.into(),
            tier: ModelTier::Standard,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn advanced(mut self) -> Self {
        self.tier = ModelTier::Advanced;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    fn to_request(&self) -> LlmRequest {
        let mut request = LlmRequest::single_turn(&self.system, &self.user);
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;
        request
    }
}

/// A score in [0, 1] with the scorer's optional explanation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub value: f64,
    pub reason: Option<String>,
}

impl Score {
    pub fn new(value: f64) -> Self {
        Self {
            value: clamp_score(value),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[async_trait]
pub trait GenerativeService: Send + Sync {
    /// Free-text completion.
    async fn generate(&self, prompt: Prompt) -> Result<String>;

    /// Numeric judgement in [0, 1].
    async fn score(&self, prompt: Prompt) -> Result<Score>;
}

fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        NEUTRAL_SCORE
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Parse a scorer answer.
///
/// Accepts a bare number (`0.8`), a labelled line (`Score: 0.8`), or a
/// number followed by an explanation. A `Reason:` line, or any text after the
/// number, becomes the reason. Unparseable answers get [`NEUTRAL_SCORE`].
pub fn parse_score(text: &str) -> Score {
    let mut value = None;
    let mut reason = None;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let lower = line.to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix("reason:") {
            let offset = line.len() - rest.len();
            reason = Some(line[offset..].trim().to_string());
            continue;
        }
        if value.is_none() {
            let body = lower
                .strip_prefix("score:")
                .map(|rest| &line[line.len() - rest.len()..])
                .unwrap_or(line);
            if let Some((number, tail)) = leading_number(body) {
                value = Some(number);
                let tail = tail.trim_start_matches(|c: char| c == '-' || c == ':' || c.is_whitespace());
                if !tail.is_empty() && reason.is_none() {
                    reason = Some(tail.to_string());
                }
            }
        }
    }

    Score {
        value: value.map(clamp_score).unwrap_or(NEUTRAL_SCORE),
        reason,
    }
}

fn leading_number(s: &str) -> Option<(f64, &str)> {
    let s = s.trim_start();
    let end = s
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    let number = s[..end].trim_end_matches('.').parse::<f64>().ok()?;
    Some((number, &s[end..]))
}

/// [`GenerativeService`] over real chat-completion clients.
pub struct LlmGenerativeService {
    standard: Arc<dyn LlmClient>,
    advanced: Arc<dyn LlmClient>,
}

impl LlmGenerativeService {
    pub fn new(standard: Arc<dyn LlmClient>, advanced: Arc<dyn LlmClient>) -> Self {
        Self { standard, advanced }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let standard = build_llm_client(config)?;
        let advanced = build_llm_client(&config.for_advanced_model())?;
        Ok(Self::new(standard, advanced))
    }

    fn client_for(&self, tier: ModelTier) -> &Arc<dyn LlmClient> {
        match tier {
            ModelTier::Standard => &self.standard,
            ModelTier::Advanced => &self.advanced,
        }
    }
}

#[async_trait]
impl GenerativeService for LlmGenerativeService {
    async fn generate(&self, prompt: Prompt) -> Result<String> {
        let client = self.client_for(prompt.tier);
        let response = client.complete(prompt.to_request()).await?;
        debug!(task = ?prompt.task, model = %response.model, "Generated text");
        Ok(response.content.trim().to_string())
    }

    async fn score(&self, prompt: Prompt) -> Result<Score> {
        let client = self.client_for(prompt.tier);
        let response = client.complete(prompt.to_request()).await?;
        let score = parse_score(&response.content);
        debug!(task = ?prompt.task, score = score.value, "Scored text");
        Ok(score)
    }
}

/// Replays queued answers per [`Task`], falling back to fixed defaults when a
/// queue runs dry. Every prompt is recorded for later inspection.
#[derive(Default)]
pub struct ScriptedGenerativeService {
    texts: Mutex<HashMap<Task, VecDeque<std::result::Result<String, LlmError>>>>,
    scores: Mutex<VecDeque<std::result::Result<Score, LlmError>>>,
    defaults: Mutex<HashMap<Task, String>>,
    default_score: Mutex<Option<f64>>,
    prompts: Mutex<Vec<Prompt>>,
}

impl ScriptedGenerativeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text(&self, task: Task, text: impl Into<String>) -> &Self {
        self.texts
            .lock()
            .entry(task)
            .or_default()
            .push_back(Ok(text.into()));
        self
    }

    pub fn push_text_error(&self, task: Task, error: LlmError) -> &Self {
        self.texts.lock().entry(task).or_default().push_back(Err(error));
        self
    }

    pub fn push_score(&self, value: f64) -> &Self {
        self.scores.lock().push_back(Ok(Score::new(value)));
        self
    }

    pub fn push_score_error(&self, error: LlmError) -> &Self {
        self.scores.lock().push_back(Err(error));
        self
    }

    pub fn set_default_text(&self, task: Task, text: impl Into<String>) -> &Self {
        self.defaults.lock().insert(task, text.into());
        self
    }

    pub fn set_default_score(&self, value: f64) -> &Self {
        *self.default_score.lock() = Some(value);
        self
    }

    /// All prompts received so far, in order.
    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().clone()
    }

    pub fn calls_for(&self, task: Task) -> usize {
        self.prompts.lock().iter().filter(|p| p.task == task).count()
    }

    fn fallback_text(&self, task: Task) -> String {
        if let Some(text) = self.defaults.lock().get(&task) {
            return text.clone();
        }
        match task {
            Task::Engagement => "YES sounds interesting".to_string(),
            Task::Response => "scripted reply".to_string(),
            Task::Refinement => "scripted refined reply".to_string(),
            Task::Reflection => "scripted reflection".to_string(),
            Task::OriginalPost => "scripted post".to_string(),
            Task::Adherence => "1.0".to_string(),
        }
    }
}

#[async_trait]
impl GenerativeService for ScriptedGenerativeService {
    async fn generate(&self, prompt: Prompt) -> Result<String> {
        let task = prompt.task;
        self.prompts.lock().push(prompt);
        let next = self.texts.lock().get_mut(&task).and_then(VecDeque::pop_front);
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(e)) => Err(e.into()),
            None => Ok(self.fallback_text(task)),
        }
    }

    async fn score(&self, prompt: Prompt) -> Result<Score> {
        self.prompts.lock().push(prompt);
        let next = self.scores.lock().pop_front();
        match next {
            Some(Ok(score)) => Ok(score),
            Some(Err(e)) => Err(e.into()),
            None => Ok(Score::new(self.default_score.lock().unwrap_or(1.0))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_number() {
        let score = parse_score("0.85");
        assert!((score.value - 0.85).abs() < 1e-9);
        assert!(score.reason.is_none());
    }

    #[test]
    fn parses_labelled_score_and_reason() {
        let score = parse_score("Score: 0.4\nReason: too formal for Mika");
        assert!((score.value - 0.4).abs() < 1e-9);
        assert_eq!(score.reason.as_deref(), Some("too formal for Mika"));
    }

    #[test]
    fn trailing_text_becomes_reason() {
        let score = parse_score("0.7 - mostly in character");
        assert!((score.value - 0.7).abs() < 1e-9);
        assert_eq!(score.reason.as_deref(), Some("mostly in character"));
    }

    #[test]
    fn clamps_out_of_range() {
        assert_eq!(parse_score("7").value, 1.0);
        assert_eq!(Score::new(-0.3).value, 0.0);
    }

    #[test]
    fn unparseable_is_neutral() {
        assert_eq!(parse_score("in character, I think").value, NEUTRAL_SCORE);
        assert_eq!(parse_score("").value, NEUTRAL_SCORE);
    }

    #[tokio::test]
    async fn scripted_service_replays_then_falls_back() {
        let service = ScriptedGenerativeService::new();
        service
            .push_text(Task::Response, "first")
            .push_score(0.4)
            .set_default_score(0.9);

        let p = || Prompt::new(Task::Response, "sys", "user");
        assert_eq!(service.generate(p()).await.unwrap(), "first");
        assert_eq!(service.generate(p()).await.unwrap(), "scripted reply");

        let s = || Prompt::new(Task::Adherence, "sys", "user");
        assert!((service.score(s()).await.unwrap().value - 0.4).abs() < 1e-9);
        assert!((service.score(s()).await.unwrap().value - 0.9).abs() < 1e-9);

        assert_eq!(service.calls_for(Task::Response), 2);
        assert_eq!(service.calls_for(Task::Adherence), 2);
    }

    #[tokio::test]
    async fn scripted_errors_surface() {
        let service = ScriptedGenerativeService::new();
        service.push_text_error(Task::Engagement, LlmError::Timeout("slow".into()));
        let err = service
            .generate(Prompt::new(Task::Engagement, "sys", "user"))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
