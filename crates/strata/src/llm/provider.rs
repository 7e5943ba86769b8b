//! Provider trait and common types for multi-provider LLM support

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{Classify, ErrorCategory};

/// Supported LLM provider types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAI,
    Anthropic,
    /// Ollama local LLM (OpenAI-compatible)
    Ollama,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::OpenAI => write!(f, "openai"),
            ProviderKind::Anthropic => write!(f, "anthropic"),
            ProviderKind::Ollama => write!(f, "ollama"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAI),
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "ollama" => Ok(ProviderKind::Ollama),
            _ => Err(format!("Unknown provider type: {}", s)),
        }
    }
}

/// Error type for provider operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Response parse error: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Provider not available: {0}")]
    NotAvailable(String),

    #[error("Context length exceeded: {0}")]
    ContextLength(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Content policy violation: {0}")]
    ContentPolicy(String),
}

impl Classify for ProviderError {
    fn category(&self) -> ErrorCategory {
        match self {
            ProviderError::RequestFailed(_) | ProviderError::Timeout(_) => ErrorCategory::Network,
            // A missing key or rejected credential only concerns this provider,
            // the next one in the chain may still answer.
            ProviderError::ParseError(_)
            | ProviderError::ConfigError(_)
            | ProviderError::RateLimited { .. }
            | ProviderError::AuthError(_)
            | ProviderError::NotAvailable(_) => ErrorCategory::Provider,
            ProviderError::ContextLength(_) | ProviderError::QuotaExceeded(_) => {
                ErrorCategory::ResourceLimit
            }
            ProviderError::InvalidRequest(_) | ProviderError::ContentPolicy(_) => {
                ErrorCategory::Business
            }
            ProviderError::ApiError { status, .. } => match status {
                408 => ErrorCategory::Network,
                413 => ErrorCategory::ResourceLimit,
                500..=599 => ErrorCategory::Provider,
                400..=499 => ErrorCategory::Business,
                _ => ErrorCategory::Unknown,
            },
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::ParseError(err.to_string())
        } else {
            ProviderError::RequestFailed(err.to_string())
        }
    }
}

/// Map a non-success HTTP status to a provider error
pub fn error_from_status(status: u16, body: String) -> ProviderError {
    if let Some(payload) = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|json| ErrorPayload::from_json(&json))
    {
        let mut payload = payload;
        payload.status = Some(status);
        return payload.into_error();
    }

    match status {
        429 => ProviderError::RateLimited {
            retry_after_ms: None,
        },
        401 | 403 => ProviderError::AuthError(body),
        503 | 529 => ProviderError::NotAvailable(body),
        _ => ProviderError::ApiError {
            status,
            message: body,
        },
    }
}

/// Options for a single generation call
#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    pub system: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Ask the provider for a JSON object when it supports that natively
    pub json_output: bool,
    /// Per-call timeout; the client default applies when unset
    pub timeout: Option<Duration>,
}

impl GenerationOptions {
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
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

    pub fn json(mut self) -> Self {
        self.json_output = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Per-million-token prices in USD
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl Pricing {
    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        (usage.input_tokens as f64 * self.input_per_mtok
            + usage.output_tokens as f64 * self.output_per_mtok)
            / 1_000_000.0
    }
}

/// Successful completion from a provider
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

/// Error object a provider returned inside an otherwise readable response body
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ErrorPayload {
    pub kind: Option<String>,
    pub code: Option<String>,
    pub message: String,
    pub status: Option<u16>,
}

impl ErrorPayload {
    /// Recognise the error envelopes used by OpenAI-compatible and Anthropic
    /// APIs: `{"error": {...}}`, `{"type": "error", "error": {...}}` and
    /// `{"error": "message"}`.
    pub fn from_json(json: &serde_json::Value) -> Option<Self> {
        let error = json.get("error")?;
        if error.is_null() {
            return None;
        }
        if let Some(message) = error.as_str() {
            return Some(Self {
                message: message.to_string(),
                ..Default::default()
            });
        }
        let object = error.as_object()?;
        let field = |name: &str| {
            object.get(name).and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
        };
        Some(Self {
            kind: field("type"),
            code: field("code"),
            message: field("message").unwrap_or_else(|| error.to_string()),
            status: None,
        })
    }

    /// Classify by the payload's structured `type` and `code` fields.
    pub fn into_error(self) -> ProviderError {
        let kind = self.kind.as_deref().unwrap_or_default();
        let code = self.code.as_deref().unwrap_or_default();
        let message = self.message;

        match (kind, code) {
            (_, "context_length_exceeded") | (_, "string_above_max_length") => {
                ProviderError::ContextLength(message)
            }
            (_, "insufficient_quota") | ("insufficient_quota", _) => {
                ProviderError::QuotaExceeded(message)
            }
            ("rate_limit_error", _) | ("rate_limit_exceeded", _) | (_, "rate_limit_exceeded") => {
                ProviderError::RateLimited {
                    retry_after_ms: None,
                }
            }
            ("overloaded_error", _) | ("server_error", _) | ("api_error", _) => {
                ProviderError::NotAvailable(message)
            }
            ("authentication_error", _) | ("permission_error", _) | (_, "invalid_api_key") => {
                ProviderError::AuthError(message)
            }
            ("content_filter", _) | (_, "content_filter") | (_, "content_policy_violation") => {
                ProviderError::ContentPolicy(message)
            }
            ("invalid_request_error", _) | ("not_found_error", _) => {
                ProviderError::InvalidRequest(message)
            }
            _ => match self.status {
                Some(status) => ProviderError::ApiError { status, message },
                None => ProviderError::ParseError(format!("unrecognised error payload: {}", message)),
            },
        }
    }
}

/// What a provider handed back for one call
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderReply {
    Completion(Completion),
    /// In-band error object. The client classifies it like any other failure.
    ErrorPayload(ErrorPayload),
}

/// Trait that all LLM providers must implement
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Name used in logs and fallback reports
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    fn model(&self) -> &str;

    fn pricing(&self) -> Pricing {
        Pricing::default()
    }

    /// Budget for one call to this provider when the caller sets none
    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<ProviderReply, ProviderError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_error_payload_is_classified_by_structure() {
        let openai = json!({
            "error": {
                "message": "This model's maximum context length is 8192 tokens",
                "type": "invalid_request_error",
                "code": "context_length_exceeded"
            }
        });
        let err = ErrorPayload::from_json(&openai).unwrap().into_error();
        assert!(matches!(err, ProviderError::ContextLength(_)));
        assert_eq!(err.category(), ErrorCategory::ResourceLimit);

        let anthropic = json!({
            "type": "error",
            "error": {"type": "overloaded_error", "message": "Overloaded"}
        });
        let err = ErrorPayload::from_json(&anthropic).unwrap().into_error();
        assert!(matches!(err, ProviderError::NotAvailable(_)));
        assert!(err.is_retryable());

        let policy = json!({"error": {"type": "invalid_request_error", "code": "content_policy_violation", "message": "no"}});
        let err = ErrorPayload::from_json(&policy).unwrap().into_error();
        assert_eq!(err.category(), ErrorCategory::Business);
    }

    #[test]
    fn test_plain_body_is_not_an_error_payload() {
        assert!(ErrorPayload::from_json(&json!({"choices": []})).is_none());
        assert!(ErrorPayload::from_json(&json!({"error": null})).is_none());
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            error_from_status(429, "slow down".to_string()),
            ProviderError::RateLimited { .. }
        ));
        assert!(matches!(
            error_from_status(529, String::new()),
            ProviderError::NotAvailable(_)
        ));
        assert_eq!(
            error_from_status(502, "bad gateway".to_string()).category(),
            ErrorCategory::Provider
        );
        assert_eq!(
            error_from_status(400, "bad input".to_string()).category(),
            ErrorCategory::Business
        );
    }

    #[test]
    fn test_pricing_per_million_tokens() {
        let pricing = Pricing {
            input_per_mtok: 3.0,
            output_per_mtok: 15.0,
        };
        let usage = TokenUsage {
            input_tokens: 1_000,
            output_tokens: 2_000,
        };
        let cost = pricing.cost(&usage);
        assert!((cost - 0.033).abs() < 1e-9);
    }
}
