//! Language-model access for Anima.
//!
//! [`GenerativeService`] is what the agent depends on. The rest of the crate
//! is the production stack behind it: an OpenAI-compatible HTTP client,
//! wrapped in retry and a per-model concurrency limit.

pub mod client;
pub mod config;
pub mod generative;
pub mod limit;
pub mod openai;
pub mod retry;

pub use client::{LlmClient, LlmRequest, LlmResponse, TokenUsage};
pub use config::{LlmConfig, build_llm_client};
pub use generative::{
    GenerativeService, LlmGenerativeService, ModelTier, NEUTRAL_SCORE, Prompt, Score,
    ScriptedGenerativeService, Task, parse_score,
};
pub use limit::SemaphoredClient;
pub use openai::OpenAiClient;
pub use retry::{RetryConfig, RetryingClient};
