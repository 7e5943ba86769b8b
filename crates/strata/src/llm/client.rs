//! Ordered fallback across LLM providers.
//!
//! Providers are tried strictly in configuration order. Network and provider
//! failures move on to the next provider; any other category propagates at
//! once because a different provider would fail the same way.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::{
    anthropic::AnthropicProvider,
    openai::OpenAiCompatibleProvider,
    provider::{GenerationOptions, LlmProvider, ProviderError, ProviderKind, ProviderReply, TokenUsage},
};
use crate::{
    config::ProviderConfig,
    error::{Classify, ProviderAttempt, Result, StrataError},
};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Text produced by whichever provider answered
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub provider: String,
    pub model: String,
    pub usage: TokenUsage,
    pub cost_usd: f64,
}

/// Client over an ordered provider chain
#[derive(Clone)]
pub struct LlmClient {
    providers: Vec<Arc<dyn LlmProvider>>,
    default_timeout: Duration,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field(
                "providers",
                &self.providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl LlmClient {
    pub fn new(providers: Vec<Arc<dyn LlmProvider>>) -> Self {
        Self {
            providers,
            default_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Build the chain from configuration, keeping the configured order.
    pub fn from_config(configs: &[ProviderConfig]) -> Self {
        let http = reqwest::Client::new();
        let providers = configs
            .iter()
            .map(|config| -> Arc<dyn LlmProvider> {
                match config.kind {
                    ProviderKind::Anthropic => {
                        Arc::new(AnthropicProvider::from_config(http.clone(), config))
                    }
                    ProviderKind::OpenAI | ProviderKind::Ollama => {
                        Arc::new(OpenAiCompatibleProvider::from_config(http.clone(), config))
                    }
                }
            })
            .collect::<Vec<_>>();

        tracing::info!(
            "[LLM_CLIENT] Provider chain: {}",
            providers
                .iter()
                .map(|p| p.name().to_string())
                .collect::<Vec<_>>()
                .join(" -> ")
        );

        Self::new(providers)
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Generate text, falling back through the chain.
    pub async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<Generation> {
        if self.providers.is_empty() {
            return Err(StrataError::NoProviders);
        }

        let mut attempts = Vec::new();

        for (i, provider) in self.providers.iter().enumerate() {
            // A caller budget wins over the provider's own, which wins over the client default
            let timeout = options
                .timeout
                .or_else(|| provider.timeout())
                .unwrap_or(self.default_timeout);
            let outcome = match tokio::time::timeout(timeout, provider.generate(prompt, options)).await
            {
                Ok(Ok(ProviderReply::Completion(completion))) if completion.text.trim().is_empty() => {
                    Err(ProviderError::ParseError("empty completion".to_string()))
                }
                Ok(Ok(ProviderReply::Completion(completion))) => Ok(completion),
                Ok(Ok(ProviderReply::ErrorPayload(payload))) => Err(payload.into_error()),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(ProviderError::Timeout(timeout)),
            };

            match outcome {
                Ok(completion) => {
                    let usage = completion.usage.unwrap_or_default();
                    let cost_usd = provider.pricing().cost(&usage);
                    tracing::debug!(
                        provider = %provider.name(),
                        input_tokens = usage.input_tokens,
                        output_tokens = usage.output_tokens,
                        "[LLM_CLIENT] Generation succeeded"
                    );
                    return Ok(Generation {
                        text: completion.text,
                        provider: provider.name().to_string(),
                        model: provider.model().to_string(),
                        usage,
                        cost_usd,
                    });
                }
                Err(err) => {
                    let category = err.category();
                    if !category.is_retryable() {
                        tracing::warn!(
                            provider = %provider.name(),
                            category = %category,
                            "[LLM_CLIENT] Non-retryable provider failure: {}",
                            err
                        );
                        return Err(StrataError::Provider {
                            provider: provider.name().to_string(),
                            source: err,
                        });
                    }

                    match self.providers.get(i + 1) {
                        Some(next) => tracing::warn!(
                            provider = %provider.name(),
                            error = %err,
                            next_provider = %next.name(),
                            "[LLM_CLIENT] Provider failed with retryable error, trying next provider"
                        ),
                        None => tracing::warn!(
                            provider = %provider.name(),
                            error = %err,
                            "[LLM_CLIENT] Last provider in chain failed"
                        ),
                    }
                    attempts.push(ProviderAttempt {
                        provider: provider.name().to_string(),
                        category,
                        message: err.to_string(),
                    });
                }
            }
        }

        Err(StrataError::AllProvidersFailed { attempts })
    }

    /// Generate and record usage in `meter`.
    pub async fn generate_metered(
        &self,
        prompt: &str,
        options: &GenerationOptions,
        meter: &UsageMeter,
    ) -> Result<Generation> {
        let generation = self.generate(prompt, options).await?;
        meter.record(&generation);
        Ok(generation)
    }
}

/// Snapshot of accumulated usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, TS)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub calls: u64,
}

/// Thread-safe token and cost accumulator for one request
#[derive(Debug, Clone, Default)]
pub struct UsageMeter {
    inner: Arc<UsageCounters>,
}

#[derive(Debug, Default)]
struct UsageCounters {
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    cost_micro_usd: AtomicU64,
    calls: AtomicU64,
}

impl UsageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, generation: &Generation) {
        let counters = &self.inner;
        counters
            .input_tokens
            .fetch_add(generation.usage.input_tokens as u64, Ordering::Relaxed);
        counters
            .output_tokens
            .fetch_add(generation.usage.output_tokens as u64, Ordering::Relaxed);
        counters
            .cost_micro_usd
            .fetch_add((generation.cost_usd * 1_000_000.0).round() as u64, Ordering::Relaxed);
        counters.calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn totals(&self) -> UsageTotals {
        let counters = &self.inner;
        UsageTotals {
            input_tokens: counters.input_tokens.load(Ordering::Relaxed),
            output_tokens: counters.output_tokens.load(Ordering::Relaxed),
            cost_usd: counters.cost_micro_usd.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            calls: counters.calls.load(Ordering::Relaxed),
        }
    }
}
