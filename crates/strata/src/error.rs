//! Error taxonomy shared by every component.
//!
//! Each failure is classified into one of five [`ErrorCategory`] values and
//! only `network` and `provider` failures are ever retried. Components never
//! re-derive retryability on their own; they ask [`Classify::category`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::{llm::ProviderError, sandbox::SandboxError, search::SearchError};

/// Failure categories used for retry and fallback decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Connection failures, DNS, per-call timeouts
    Network,
    /// Rate limits, overloaded or malformed provider responses
    Provider,
    /// Context too long, quota exhausted, sandbox resources exceeded
    ResourceLimit,
    /// Invalid input, policy violations, auth and configuration problems
    Business,
    Unknown,
}

impl ErrorCategory {
    /// Only network and provider failures are worth another attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorCategory::Network | ErrorCategory::Provider)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Provider => "provider",
            ErrorCategory::ResourceLimit => "resource_limit",
            ErrorCategory::Business => "business",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything that can be placed in the failure taxonomy
pub trait Classify {
    fn category(&self) -> ErrorCategory;

    fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

/// One failed provider invocation inside an exhausted fallback chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderAttempt {
    pub provider: String,
    pub category: ErrorCategory,
    pub message: String,
}

/// Main error type for Strata operations
#[derive(Debug, thiserror::Error)]
pub enum StrataError {
    #[error("Provider '{provider}' failed: {source}")]
    Provider {
        provider: String,
        #[source]
        source: ProviderError,
    },

    #[error("All providers failed: {}", summarize_attempts(.attempts))]
    AllProvidersFailed { attempts: Vec<ProviderAttempt> },

    #[error("No LLM providers configured")]
    NoProviders,

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("No handler registered for mode '{0}'")]
    MissingHandler(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn summarize_attempts(attempts: &[ProviderAttempt]) -> String {
    if attempts.is_empty() {
        return "no attempts recorded".to_string();
    }
    attempts
        .iter()
        .map(|a| format!("{} ({}): {}", a.provider, a.category, a.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl Classify for StrataError {
    fn category(&self) -> ErrorCategory {
        match self {
            StrataError::Provider { source, .. } => source.category(),
            StrataError::AllProvidersFailed { .. } => ErrorCategory::Provider,
            StrataError::NoProviders => ErrorCategory::Business,
            StrataError::Search(e) => e.category(),
            StrataError::Sandbox(e) => e.category(),
            StrataError::Timeout { .. } => ErrorCategory::Network,
            StrataError::InvalidRequest(_)
            | StrataError::ConfigError(_)
            | StrataError::MissingHandler(_) => ErrorCategory::Business,
            StrataError::IoError(_)
            | StrataError::SerializationError(_)
            | StrataError::Internal(_) => ErrorCategory::Unknown,
        }
    }
}

impl From<config::ConfigError> for StrataError {
    fn from(err: config::ConfigError) -> Self {
        StrataError::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StrataError>;
