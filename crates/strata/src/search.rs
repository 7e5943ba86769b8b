//! Web search backends

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::{
    config::SearchConfig,
    error::{Classify, ErrorCategory},
};

/// One search result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub published_date: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SearchError {
    #[error("Search request failed: {0}")]
    Transport(String),

    #[error("Search timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Search API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Search backend not configured: {0}")]
    NotConfigured(String),

    #[error("Failed to parse search response: {0}")]
    Malformed(String),

    #[error("Every search backend failed: {}", .0.join("; "))]
    Exhausted(Vec<String>),
}

impl Classify for SearchError {
    fn category(&self) -> ErrorCategory {
        match self {
            SearchError::Transport(_) | SearchError::Timeout(_) => ErrorCategory::Network,
            SearchError::Api { status, .. } => match status {
                401 | 403 | 429 | 500..=599 => ErrorCategory::Provider,
                _ => ErrorCategory::Business,
            },
            SearchError::NotConfigured(_)
            | SearchError::Malformed(_)
            | SearchError::Exhausted(_) => ErrorCategory::Provider,
        }
    }
}

#[async_trait]
pub trait SearchService: Send + Sync {
    fn name(&self) -> &str;

    /// Ordered results, best first, at most `limit`
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, SearchError>;
}

/// Exa neural search
pub struct ExaSearch {
    http_client: Client,
    api_key: Option<String>,
    endpoint: String,
}

impl ExaSearch {
    pub fn from_config(config: &SearchConfig) -> Self {
        let api_key = std::env::var(&config.exa_api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            tracing::warn!(
                "[SEARCH] Exa search created without API key ({} not set)",
                config.exa_api_key_env
            );
        }
        Self {
            http_client: Client::new(),
            api_key,
            endpoint: config.endpoint.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn parse_results(json: &serde_json::Value) -> Result<Vec<SearchHit>, SearchError> {
        let results = json["results"]
            .as_array()
            .ok_or_else(|| SearchError::Malformed("missing results array".to_string()))?;

        Ok(results
            .iter()
            .filter_map(|r| {
                let url = r["url"].as_str()?.to_string();
                Some(SearchHit {
                    title: r["title"].as_str().unwrap_or("").to_string(),
                    content: r["text"]
                        .as_str()
                        .or_else(|| r["snippet"].as_str())
                        .unwrap_or("")
                        .to_string(),
                    published_date: r["publishedDate"].as_str().map(String::from),
                    url,
                })
            })
            .collect())
    }
}

#[async_trait]
impl SearchService for ExaSearch {
    fn name(&self) -> &str {
        "exa"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, SearchError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| SearchError::NotConfigured("no Exa API key".to_string()))?;

        tracing::info!("[SEARCH] Exa search: {}", query);

        let response = self
            .http_client
            .post(&self.endpoint)
            .header("x-api-key", api_key)
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({
                "query": query,
                "numResults": limit,
                "type": "auto",
                "contents": {"text": {"maxCharacters": 2000}}
            }))
            .send()
            .await
            .map_err(|e| SearchError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(SearchError::Api { status, message });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SearchError::Malformed(e.to_string()))?;

        let mut hits = Self::parse_results(&json)?;
        hits.truncate(limit);
        Ok(hits)
    }
}

/// Tries backends in order and returns the first non-empty result list
pub struct FallbackSearch {
    backends: Vec<Arc<dyn SearchService>>,
}

impl FallbackSearch {
    pub fn new(backends: Vec<Arc<dyn SearchService>>) -> Self {
        Self { backends }
    }
}

#[async_trait]
impl SearchService for FallbackSearch {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, SearchError> {
        let mut failures = Vec::new();
        let mut any_succeeded = false;

        for backend in &self.backends {
            match backend.search(query, limit).await {
                Ok(hits) if !hits.is_empty() => return Ok(hits),
                Ok(_) => {
                    any_succeeded = true;
                    tracing::debug!(backend = %backend.name(), "[SEARCH] No results, trying next backend");
                }
                Err(err) => {
                    tracing::warn!(
                        backend = %backend.name(),
                        "[SEARCH] Backend failed, trying next: {}",
                        err
                    );
                    failures.push(format!("{}: {}", backend.name(), err));
                }
            }
        }

        if any_succeeded || failures.is_empty() {
            Ok(Vec::new())
        } else {
            Err(SearchError::Exhausted(failures))
        }
    }
}
