//! Client for OpenAI-compatible `/v1/chat/completions` endpoints. Ollama
//! serves the same protocol, so one client covers both providers.

use std::time::Duration;

use async_trait::async_trait;
use anima_common::{LlmError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::{LlmClient, LlmRequest, LlmResponse, TokenUsage};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com";
const COMPLETIONS_PATH: &str = "/v1/chat/completions";

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: [WireMessage<'a>; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct WireResponse {
    model: String,
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireReply,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireReply {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiClient {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Request(format!("building HTTP client: {e}")))?;
        Ok(Self {
            endpoint: format!("{}{COMPLETIONS_PATH}", base_url.trim_end_matches('/')),
            model: model.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
            http,
        })
    }

    fn wire_request<'a>(&'a self, request: &'a LlmRequest) -> WireRequest<'a> {
        WireRequest {
            model: &self.model,
            messages: [
                WireMessage {
                    role: "system",
                    content: &request.system,
                },
                WireMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }
}

/// Classify a non-success status so the retry layer can branch on it.
fn status_error(status: u16, retry_after_secs: Option<u64>, body: String) -> LlmError {
    match status {
        429 => LlmError::RateLimited {
            message: body,
            retry_after_ms: retry_after_secs.map(|secs| secs.saturating_mul(1000)),
        },
        408 => LlmError::Timeout(body),
        500.. => LlmError::Server {
            status,
            message: body,
        },
        _ => LlmError::Request(format!("HTTP {status}: {body}")),
    }
}

fn transport_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout(e.to_string())
    } else {
        LlmError::Request(e.to_string())
    }
}

fn into_response(wire: WireResponse) -> Result<LlmResponse> {
    let choice = wire
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse("completion had no choices".into()))?;
    Ok(LlmResponse {
        content: choice.message.content.unwrap_or_default(),
        model: wire.model,
        usage: wire.usage,
        finish_reason: choice.finish_reason,
    })
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let mut call = self.http.post(&self.endpoint).json(&self.wire_request(&request));
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let reply = call.send().await.map_err(transport_error)?;
        let status = reply.status();
        if !status.is_success() {
            let retry_after = reply
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let body = reply.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), retry_after, body).into());
        }

        let wire: WireResponse = reply
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        let response = into_response(wire)?;
        debug!(
            model = %response.model,
            prompt_chars = request.prompt_chars(),
            tokens = response.usage.map(|u| u.total()),
            "Completion received"
        );
        Ok(response)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
