//! Engine configuration
//!
//! Values come from built-in defaults, an optional TOML file and `STRATA__*`
//! environment variables, in increasing order of precedence.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, StrataError},
    llm::{Pricing, ProviderKind},
    retry::RetryPolicy,
};

/// One entry in the provider fallback chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub model: String,
    /// Overrides the provider's default endpoint
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub input_cost_per_mtok: f64,
    #[serde(default)]
    pub output_cost_per_mtok: f64,
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn pricing(&self) -> Pricing {
        Pricing {
            input_per_mtok: self.input_cost_per_mtok,
            output_per_mtok: self.output_cost_per_mtok,
        }
    }

    pub fn api_key(&self) -> Option<String> {
        let var = self.api_key_env.clone().or_else(|| match self.kind {
            ProviderKind::OpenAI => Some("OPENAI_API_KEY".to_string()),
            ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY".to_string()),
            ProviderKind::Ollama => None,
        })?;
        std::env::var(var).ok().filter(|k| !k.trim().is_empty())
    }
}

fn default_provider_timeout() -> u64 {
    60
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            kind: ProviderKind::Anthropic,
            model: "claude-3-5-sonnet-latest".to_string(),
            endpoint: None,
            api_key_env: None,
            timeout_secs: default_provider_timeout(),
            input_cost_per_mtok: 3.0,
            output_cost_per_mtok: 15.0,
        },
        ProviderConfig {
            kind: ProviderKind::OpenAI,
            model: "gpt-4o-mini".to_string(),
            endpoint: None,
            api_key_env: None,
            timeout_secs: default_provider_timeout(),
            input_cost_per_mtok: 0.15,
            output_cost_per_mtok: 0.6,
        },
        ProviderConfig {
            kind: ProviderKind::Ollama,
            model: "llama3.2".to_string(),
            endpoint: None,
            api_key_env: None,
            timeout_secs: 120,
            input_cost_per_mtok: 0.0,
            output_cost_per_mtok: 0.0,
        },
    ]
}

/// Limits on in-memory conversation history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Least recently used conversations are dropped past this count
    #[serde(default = "default_max_conversations")]
    pub max_conversations: u64,
    #[serde(default = "default_conversation_idle_ttl")]
    pub idle_ttl_secs: u64,
}

fn default_max_conversations() -> u64 {
    10_000
}

fn default_conversation_idle_ttl() -> u64 {
    24 * 3600
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_conversations: default_max_conversations(),
            idle_ttl_secs: default_conversation_idle_ttl(),
        }
    }
}

impl ConversationConfig {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_cache_max_entries() -> usize {
    1000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
            max_entries: default_cache_max_entries(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.base_delay_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_total_queries")]
    pub max_total_queries: usize,
    #[serde(default = "default_queries_per_iteration")]
    pub queries_per_iteration: usize,
    #[serde(default = "default_search_parallelism")]
    pub search_parallelism: usize,
    #[serde(default = "default_results_per_query")]
    pub results_per_query: usize,
    #[serde(default = "default_max_charts")]
    pub max_charts: usize,
    #[serde(default = "default_chart_failure_threshold")]
    pub chart_failure_threshold: usize,
    #[serde(default = "default_search_timeout")]
    pub search_timeout_secs: u64,
    #[serde(default = "default_llm_timeout")]
    pub llm_timeout_secs: u64,
    #[serde(default = "default_chart_timeout")]
    pub chart_timeout_secs: u64,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_max_iterations() -> u32 {
    3
}

fn default_max_total_queries() -> usize {
    24
}

fn default_queries_per_iteration() -> usize {
    6
}

fn default_search_parallelism() -> usize {
    5
}

fn default_results_per_query() -> usize {
    5
}

fn default_max_charts() -> usize {
    3
}

fn default_chart_failure_threshold() -> usize {
    2
}

fn default_search_timeout() -> u64 {
    30
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_chart_timeout() -> u64 {
    60
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./reports")
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_total_queries: default_max_total_queries(),
            queries_per_iteration: default_queries_per_iteration(),
            search_parallelism: default_search_parallelism(),
            results_per_query: default_results_per_query(),
            max_charts: default_max_charts(),
            chart_failure_threshold: default_chart_failure_threshold(),
            search_timeout_secs: default_search_timeout(),
            llm_timeout_secs: default_llm_timeout(),
            chart_timeout_secs: default_chart_timeout(),
            output_dir: default_output_dir(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxRuntime {
    /// `docker run` (or a compatible CLI) with networking disabled
    Container,
    /// Plain interpreter on the host
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_sandbox_runtime")]
    pub runtime: SandboxRuntime,
    /// Container CLI used when `runtime = "container"`
    #[serde(default = "default_container_program")]
    pub program: String,
    #[serde(default = "default_image")]
    pub image: String,
    /// Interpreter inside the container, or on the host for `local`
    #[serde(default = "default_python")]
    pub python: String,
    #[serde(default = "default_sandbox_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,
}

fn default_true() -> bool {
    true
}

fn default_sandbox_runtime() -> SandboxRuntime {
    SandboxRuntime::Container
}

fn default_container_program() -> String {
    "docker".to_string()
}

fn default_image() -> String {
    "python:3.11-slim".to_string()
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_sandbox_timeout() -> u64 {
    60
}

fn default_queue_capacity() -> usize {
    64
}

fn default_memory_limit() -> String {
    "512m".to_string()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            runtime: default_sandbox_runtime(),
            program: default_container_program(),
            image: default_image(),
            python: default_python(),
            timeout_secs: default_sandbox_timeout(),
            queue_capacity: default_queue_capacity(),
            memory_limit: default_memory_limit(),
        }
    }
}

impl SandboxConfig {
    /// Host interpreter sandbox, used by tests and `sandbox-check --local`
    pub fn local(python: impl Into<String>) -> Self {
        Self {
            runtime: SandboxRuntime::Local,
            python: python.into(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_exa_key_env")]
    pub exa_api_key_env: String,
    #[serde(default = "default_exa_endpoint")]
    pub endpoint: String,
}

fn default_exa_key_env() -> String {
    "EXA_API_KEY".to_string()
}

fn default_exa_endpoint() -> String {
    "https://api.exa.ai/search".to_string()
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            exa_api_key_env: default_exa_key_env(),
            endpoint: default_exa_endpoint(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrataConfig {
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub conversations: ConversationConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            cache: CacheConfig::default(),
            conversations: ConversationConfig::default(),
            retry: RetryConfig::default(),
            research: ResearchConfig::default(),
            sandbox: SandboxConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl StrataConfig {
    /// Load `.env`, then the optional config file, then `STRATA__*` overrides
    /// (for example `STRATA__CACHE__TTL_SECS=60`).
    pub fn load(path: Option<&std::path::Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut builder = config::Config::builder();
        match path {
            Some(path) => {
                builder = builder.add_source(config::File::from(path.to_path_buf()).required(true));
            }
            None => {
                builder = builder.add_source(config::File::with_name("strata").required(false));
            }
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("STRATA")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: StrataConfig = settings.try_deserialize()?;
        config.validate()?;
        tracing::debug!(
            providers = config.providers.len(),
            "[CONFIG] Configuration loaded"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| Err(StrataError::ConfigError(message.to_string()));

        if self.providers.is_empty() {
            return invalid("at least one provider must be configured");
        }
        if self.providers.iter().any(|p| p.model.trim().is_empty()) {
            return invalid("provider model must not be empty");
        }
        if self.providers.iter().any(|p| p.timeout_secs == 0) {
            return invalid("provider timeout_secs must be positive");
        }
        if self.cache.max_entries == 0 {
            return invalid("cache.max_entries must be positive");
        }
        if self.conversations.max_conversations == 0 {
            return invalid("conversations.max_conversations must be positive");
        }
        if self.research.max_iterations == 0 {
            return invalid("research.max_iterations must be positive");
        }
        if self.research.queries_per_iteration == 0 || self.research.max_total_queries == 0 {
            return invalid("research query budgets must be positive");
        }
        if self.research.search_parallelism == 0 {
            return invalid("research.search_parallelism must be positive");
        }
        if self.research.chart_failure_threshold == 0 {
            return invalid("research.chart_failure_threshold must be positive");
        }
        if self.sandbox.queue_capacity == 0 {
            return invalid("sandbox.queue_capacity must be positive");
        }
        if self.sandbox.timeout_secs == 0 {
            return invalid("sandbox.timeout_secs must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = StrataConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.providers[0].kind, ProviderKind::Anthropic);
        assert_eq!(config.cache.ttl(), Duration::from_secs(3600));
        assert_eq!(config.retry.policy().max_retries, 2);
        assert_eq!(config.research.max_iterations, 3);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[cache]
ttl_secs = 60

[conversations]
max_conversations = 50

[research]
max_charts = 1

[[providers]]
kind = "ollama"
model = "qwen2.5"
endpoint = "http://localhost:11434/v1/chat/completions"
"#
        )
        .unwrap();

        let config = StrataConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.cache.max_entries, 1000);
        assert_eq!(config.conversations.max_conversations, 50);
        assert_eq!(config.conversations.idle_ttl(), Duration::from_secs(24 * 3600));
        assert_eq!(config.research.max_charts, 1);
        assert_eq!(config.research.max_iterations, 3);
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[0].kind, ProviderKind::Ollama);
        assert_eq!(config.providers[0].timeout_secs, 60);
    }

    #[test]
    fn test_validate_rejects_zero_budgets() {
        let mut config = StrataConfig::default();
        config.research.search_parallelism = 0;
        assert!(matches!(
            config.validate(),
            Err(StrataError::ConfigError(_))
        ));
    }
}
