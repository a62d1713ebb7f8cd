//! Persona definition and persona-consistent generation.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anima_common::{AnimaError, Result};
use anima_llm::{GenerativeService, Prompt, Task};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const REASON_CONTENT_FILTERED: &str = "content_filtered";
pub const REASON_INTEREST_MATCH: &str = "interest_match";

const REACTION_PHRASES: &[&str] = &["讚", "好厲害", "好強", "感謝", "謝謝", "笑死", "哈哈"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occupation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub background: String,
    /// Appended to published text, never stored in memory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Personality {
    #[serde(default)]
    pub traits: Vec<String>,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default = "default_communication_style")]
    pub communication_style: String,
    #[serde(default)]
    pub emotional_tendencies: Vec<String>,
}

fn default_communication_style() -> String {
    "casual and friendly".into()
}

impl Default for Personality {
    fn default() -> Self {
        Self {
            traits: Vec::new(),
            values: Vec::new(),
            communication_style: default_communication_style(),
            emotional_tendencies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechPatterns {
    #[serde(default = "default_vocabulary")]
    pub vocabulary_level: String,
    #[serde(default = "default_sentence_length")]
    pub sentence_length: String,
    #[serde(default = "default_emoji_usage")]
    pub emoji_usage: String,
    #[serde(default)]
    pub typical_phrases: Vec<String>,
    #[serde(default)]
    pub language_quirks: Vec<String>,
}

fn default_vocabulary() -> String {
    "moderate".into()
}

fn default_sentence_length() -> String {
    "medium".into()
}

fn default_emoji_usage() -> String {
    "occasional".into()
}

impl Default for SpeechPatterns {
    fn default() -> Self {
        Self {
            vocabulary_level: default_vocabulary(),
            sentence_length: default_sentence_length(),
            emoji_usage: default_emoji_usage(),
            typical_phrases: Vec::new(),
            language_quirks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Interests {
    #[serde(default)]
    pub primary: Vec<String>,
    #[serde(default)]
    pub secondary: Vec<String>,
    #[serde(default)]
    pub dislikes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Opinions {
    #[serde(default)]
    pub worldview: String,
    #[serde(default)]
    pub topics: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRules {
    #[serde(default = "default_respond_to")]
    pub respond_to: Vec<String>,
    /// Lowercased keywords; content containing any of them is not engaged
    #[serde(default = "default_avoid")]
    pub avoid_responding_to: Vec<String>,
    #[serde(default)]
    pub tone_modifiers: BTreeMap<String, String>,
    #[serde(default = "default_max_response_length")]
    pub max_response_length: usize,
}

fn default_respond_to() -> Vec<String> {
    vec![
        "questions".into(),
        "interesting_opinions".into(),
        "shared_interests".into(),
    ]
}

fn default_avoid() -> Vec<String> {
    vec!["spam".into(), "harassment".into(), "off_topic".into()]
}

fn default_max_response_length() -> usize {
    280
}

impl Default for InteractionRules {
    fn default() -> Self {
        Self {
            respond_to: default_respond_to(),
            avoid_responding_to: default_avoid(),
            tone_modifiers: BTreeMap::new(),
            max_response_length: default_max_response_length(),
        }
    }
}

/// Complete persona definition, loaded from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub identity: Identity,
    #[serde(default)]
    pub personality: Personality,
    #[serde(default)]
    pub speech_patterns: SpeechPatterns,
    #[serde(default)]
    pub interests: Interests,
    #[serde(default)]
    pub opinions: Opinions,
    #[serde(default)]
    pub interaction_rules: InteractionRules,
}

fn join_or(items: &[String], fallback: &str) -> String {
    if items.is_empty() {
        fallback.to_string()
    } else {
        items.join(", ")
    }
}

impl Persona {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            identity: Identity {
                name: name.into(),
                age: None,
                occupation: None,
                location: None,
                background: String::new(),
                signature: None,
            },
            personality: Personality::default(),
            speech_patterns: SpeechPatterns::default(),
            interests: Interests::default(),
            opinions: Opinions::default(),
            interaction_rules: InteractionRules::default(),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AnimaError::Persona(format!("Failed to read persona '{}': {e}", path.display()))
        })?;
        let persona: Self = serde_json::from_str(&content)?;
        if persona.identity.name.trim().is_empty() {
            return Err(AnimaError::Persona("identity.name must not be empty".into()));
        }
        Ok(persona)
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// `"\n\n{signature}"`, or empty when no signature is configured.
    pub fn signature_suffix(&self) -> String {
        match self.identity.signature.as_deref() {
            Some(sig) if !sig.is_empty() => format!("\n\n{sig}"),
            _ => String::new(),
        }
    }

    pub fn system_prompt(&self) -> String {
        let identity = &self.identity;
        let age = identity
            .age
            .map(|a| a.to_string())
            .unwrap_or_else(|| "young adult".to_string());
        let occupation = identity.occupation.as_deref().unwrap_or("person");

        format!(
            "You are {name}, a {age}-year-old {occupation}.\n\n\
             Background: {background}\n\n\
             Personality: You are {traits}. Your communication style is {style}.\n\
             Your core values are: {values}.\n\n\
             Interests: You're particularly interested in {interests}.\n\n\
             Speech patterns:\n\
             - Vocabulary: {vocabulary}\n\
             - You use emojis {emoji}\n\
             - Characteristic phrases: {phrases}\n\n\
             Worldview: {worldview}\n\n\
             IMPORTANT RULES:\n\
             - Always stay in character as {name}\n\
             - Keep responses under {max_len} characters\n\
             - Be authentic to your personality - don't be generic\n\
             - Draw from your interests when relevant\n\
             - Use your characteristic speech patterns naturally\n",
            name = identity.name,
            background = identity.background,
            traits = join_or(&self.personality.traits, "balanced"),
            style = self.personality.communication_style,
            values = join_or(&self.personality.values, "authenticity and growth"),
            interests = join_or(&self.interests.primary, "various topics"),
            vocabulary = self.speech_patterns.vocabulary_level,
            emoji = self.speech_patterns.emoji_usage,
            phrases = join_or(&self.speech_patterns.typical_phrases, "none specific"),
            worldview = self.opinions.worldview,
            max_len = self.interaction_rules.max_response_length,
        )
    }
}

/// Whether to respond to a candidate item, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementDecision {
    pub engage: bool,
    pub reason: String,
}

impl EngagementDecision {
    fn new(engage: bool, reason: impl Into<String>) -> Self {
        Self {
            engage,
            reason: reason.into(),
        }
    }

    pub fn is_filtered(&self) -> bool {
        self.reason == REASON_CONTENT_FILTERED
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdherenceCheck {
    pub passes: bool,
    pub score: f64,
    pub reason: Option<String>,
}

/// Cut `text` to at most `max_chars` characters, ending in `...` when cut.
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

fn is_emoji(c: char) -> bool {
    matches!(
        c as u32,
        0x1F000..=0x1FAFF | 0x2600..=0x27BF | 0x2300..=0x23FF | 0x2B00..=0x2BFF | 0xFE0F | 0x200D
    )
}

/// Short or reaction-only posts (emoji, "讚", "哈哈") that need little context.
pub fn is_simple_reaction(text: &str) -> bool {
    let stripped = text.trim();
    if stripped.is_empty() {
        return false;
    }
    if stripped.chars().count() <= 10 {
        return true;
    }
    if REACTION_PHRASES.iter().any(|p| stripped.contains(p)) {
        return true;
    }
    if stripped.chars().any(is_emoji) {
        let rest = stripped
            .chars()
            .filter(|c| !is_emoji(*c) && !c.is_whitespace())
            .count();
        return rest <= 2;
    }
    false
}

/// Persona-consistent decisions and generation over a [`GenerativeService`].
pub struct PersonaEngine {
    persona: Persona,
    service: Arc<dyn GenerativeService>,
    adherence_threshold: f64,
    system_prompt: String,
}

impl PersonaEngine {
    pub fn new(persona: Persona, service: Arc<dyn GenerativeService>, adherence_threshold: f64) -> Self {
        let system_prompt = persona.system_prompt();
        Self {
            persona,
            service,
            adherence_threshold,
            system_prompt,
        }
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn max_len(&self) -> usize {
        self.persona.interaction_rules.max_response_length
    }

    pub async fn should_engage(&self, text: &str) -> Result<EngagementDecision> {
        let lower = text.to_lowercase();
        let rules = &self.persona.interaction_rules;
        if rules
            .avoid_responding_to
            .iter()
            .any(|kw| !kw.is_empty() && lower.contains(&kw.to_lowercase()))
        {
            return Ok(EngagementDecision::new(false, REASON_CONTENT_FILTERED));
        }

        let interests = &self.persona.interests;
        let matched = interests
            .primary
            .iter()
            .chain(interests.secondary.iter())
            .any(|i| !i.is_empty() && lower.contains(&i.to_lowercase()));
        if matched {
            return Ok(EngagementDecision::new(true, REASON_INTEREST_MATCH));
        }

        self.ask_engagement(text).await
    }

    async fn ask_engagement(&self, text: &str) -> Result<EngagementDecision> {
        let user = format!(
            "As {name}, would you want to engage with this post?\n\n\
             Post: \"{text}\"\n\n\
             Your interests: {interests}\n\
             Your values: {values}\n\n\
             Respond with just \"YES\" or \"NO\" followed by a brief reason.",
            name = self.persona.name(),
            interests = self.persona.interests.primary.join(", "),
            values = self.persona.personality.values.join(", "),
        );
        let prompt = Prompt::new(
            Task::Engagement,
            "You decide whether to engage with posts. Be selective.",
            user,
        )
        .with_temperature(0.3)
        .with_max_tokens(50);

        let answer = self.service.generate(prompt).await?;
        let answer = answer.trim();
        let engage = answer.to_uppercase().starts_with("YES");
        let reason = match answer.split_once(char::is_whitespace) {
            Some((_, rest)) if !rest.trim().is_empty() => rest.trim().to_string(),
            _ if engage => "interest_aligned".to_string(),
            _ => "not_interested".to_string(),
        };
        debug!(engage, reason = %reason, "Engagement decided by model");
        Ok(EngagementDecision::new(engage, reason))
    }

    pub async fn generate_response(&self, context: &str, memory_context: &str) -> Result<String> {
        let user = format!(
            "Someone posted: \"{context}\"\n\n\
             {memory_context}\n\n\
             Write a reply as {name}. Be authentic to your personality.\n\
             Keep it concise (under {max_len} characters).\n\
             Don't be generic - let your personality shine through.",
            name = self.persona.name(),
            max_len = self.max_len(),
        );
        let prompt = Prompt::new(Task::Response, self.system_prompt.clone(), user)
            .with_temperature(0.8)
            .with_max_tokens(150);

        let generated = self.service.generate(prompt).await?;
        let generated = truncate_with_ellipsis(generated.trim(), self.max_len());
        debug!(length = generated.chars().count(), "Response generated");
        Ok(generated)
    }

    pub async fn verify_adherence(&self, response: &str) -> Result<AdherenceCheck> {
        let user = format!(
            "Evaluate if this response sounds like it came from {name}.\n\n\
             Persona traits: {traits}\n\
             Communication style: {style}\n\
             Speech patterns: vocabulary={vocabulary}, emoji={emoji}\n\n\
             Response to evaluate: \"{response}\"\n\n\
             Score the adherence from 0.0 to 1.0, where:\n\
             - 1.0 = perfectly in character\n\
             - 0.7 = mostly in character with minor inconsistencies\n\
             - 0.5 = generic, could be anyone\n\
             - 0.3 = somewhat out of character\n\
             - 0.0 = completely wrong character\n\n\
             Respond with just the number, optionally followed by a line \"Reason: ...\".",
            name = self.persona.name(),
            traits = self.persona.personality.traits.join(", "),
            style = self.persona.personality.communication_style,
            vocabulary = self.persona.speech_patterns.vocabulary_level,
            emoji = self.persona.speech_patterns.emoji_usage,
        );
        let prompt = Prompt::new(
            Task::Adherence,
            "You are an expert at evaluating persona consistency.",
            user,
        )
        .with_temperature(0.1)
        .with_max_tokens(60);

        let score = self.service.score(prompt).await?;
        let passes = score.value >= self.adherence_threshold;
        debug!(score = score.value, passes, "Persona adherence checked");
        Ok(AdherenceCheck {
            passes,
            score: score.value,
            reason: score.reason,
        })
    }

    /// Rewrite `original` to sound more like the persona, on the advanced model.
    pub async fn refine_response(&self, original: &str, feedback: Option<&str>) -> Result<String> {
        let feedback = feedback
            .filter(|f| !f.is_empty())
            .map(|f| format!("Feedback: {f}"))
            .unwrap_or_default();
        let user = format!(
            "This response needs to sound more like {name}:\n\n\
             Original: \"{original}\"\n\n\
             {feedback}\n\n\
             Traits to embody: {traits}\n\
             Communication style: {style}\n\n\
             Rewrite to be more authentic while keeping the same meaning.\n\
             Keep it under {max_len} characters.",
            name = self.persona.name(),
            traits = self.persona.personality.traits.join(", "),
            style = self.persona.personality.communication_style,
            max_len = self.max_len(),
        );
        let prompt = Prompt::new(Task::Refinement, self.system_prompt.clone(), user)
            .advanced()
            .with_temperature(0.7)
            .with_max_tokens(200);

        let refined = self.service.generate(prompt).await?;
        let refined = refined.trim();
        let refined = if refined.is_empty() {
            original.to_string()
        } else {
            truncate_with_ellipsis(refined, self.max_len())
        };
        info!(
            original_len = original.chars().count(),
            refined_len = refined.chars().count(),
            "Response refined"
        );
        Ok(refined)
    }

    /// Draft an original post about `topic`, on the advanced model.
    pub async fn compose_post(&self, topic: &str, memory_context: &str) -> Result<String> {
        let user = format!(
            "As {name}, write a short Threads post about: {topic}\n\n\
             {memory_context}\n\n\
             Guidelines:\n\
             - Be authentic to your personality\n\
             - Share a thought, observation, or question\n\
             - Keep it under {max_len} characters\n\
             - Don't be preachy or generic\n",
            name = self.persona.name(),
            max_len = self.max_len(),
        );
        let prompt = Prompt::new(Task::OriginalPost, self.system_prompt.clone(), user).advanced();
        let text = self.service.generate(prompt).await?;
        Ok(text.trim().to_string())
    }
}
