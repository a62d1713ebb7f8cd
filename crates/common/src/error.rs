//! Error types for Anima.
//!
//! Collaborator failures are modeled as values with an explicit kind so that
//! callers branch on "transient vs. permanent" instead of matching on text.

use thiserror::Error;

/// Provider error codes that signal a temporary platform-side failure.
const TRANSIENT_PLATFORM_CODES: &[i64] = &[1, 2];

#[derive(Error, Debug)]
pub enum AnimaError {
    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Memory error: {0}")]
    Memory(String),

    #[error("Persona error: {0}")]
    Persona(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AnimaError {
    /// Whether retrying the same call could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            AnimaError::Platform(e) => e.is_transient(),
            AnimaError::Llm(e) => e.is_retryable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AnimaError>;

/// An error returned by the social platform.
///
/// `status_code` is the HTTP status when one was received; `error_code` is the
/// provider's own code from the error body. Transport failures (connect,
/// timeout) carry neither and set `transport`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Platform API error (status={status_code:?}, code={error_code:?}): {message}")]
pub struct PlatformError {
    pub message: String,
    pub status_code: Option<u16>,
    pub error_code: Option<i64>,
    pub transport: bool,
}

impl PlatformError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: None,
            error_code: None,
            transport: false,
        }
    }

    pub fn with_status(message: impl Into<String>, status_code: u16) -> Self {
        Self {
            status_code: Some(status_code),
            ..Self::new(message)
        }
    }

    pub fn with_code(mut self, error_code: i64) -> Self {
        self.error_code = Some(error_code);
        self
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            transport: true,
            ..Self::new(message)
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_status(message, 404)
    }

    /// Server-side 5xx, rate limiting, a provider "temporarily unavailable"
    /// code, or a transport failure.
    pub fn is_transient(&self) -> bool {
        if self.transport || self.is_rate_limited() {
            return true;
        }
        if matches!(self.status_code, Some(s) if s >= 500) {
            return true;
        }
        matches!(self.error_code, Some(c) if TRANSIENT_PLATFORM_CODES.contains(&c))
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code == Some(404)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status_code == Some(429)
    }
}

/// An error returned by the generative-language service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("LLM rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_ms: Option<u64>,
    },

    #[error("LLM server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("LLM request timed out: {0}")]
    Timeout(String),

    #[error("LLM request failed: {0}")]
    Request(String),

    #[error("Invalid LLM response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. } | LlmError::Server { .. } | LlmError::Timeout(_)
        )
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            LlmError::RateLimited { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }
}
