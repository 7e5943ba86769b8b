//! OpenAI-compatible chat completions provider (OpenAI and Ollama)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::provider::{
    error_from_status, Completion, ErrorPayload, GenerationOptions, LlmProvider, Pricing,
    ProviderError, ProviderKind, ProviderReply, TokenUsage,
};
use crate::config::ProviderConfig;

const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const OLLAMA_ENDPOINT: &str = "http://localhost:11434/v1/chat/completions";

/// Provider speaking the `/v1/chat/completions` protocol
pub struct OpenAiCompatibleProvider {
    client: Client,
    name: String,
    kind: ProviderKind,
    model: String,
    api_key: Option<String>,
    endpoint: String,
    pricing: Pricing,
    timeout: Duration,
}

impl OpenAiCompatibleProvider {
    pub fn from_config(client: Client, config: &ProviderConfig) -> Self {
        let endpoint = config.endpoint.clone().unwrap_or_else(|| match config.kind {
            ProviderKind::Ollama => OLLAMA_ENDPOINT.to_string(),
            _ => OPENAI_ENDPOINT.to_string(),
        });
        let api_key = config.api_key();

        if api_key.is_none() && config.kind == ProviderKind::OpenAI {
            tracing::warn!("[LLM_CLIENT] OpenAI provider created without API key");
        }

        Self {
            client,
            name: format!("{}:{}", config.kind, config.model),
            kind: config.kind,
            model: config.model.clone(),
            api_key,
            endpoint,
            pricing: config.pricing(),
            timeout: config.timeout(),
        }
    }

    fn build_payload(&self, prompt: &str, options: &GenerationOptions) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(system) = &options.system {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        messages.push(serde_json::json!({"role": "user", "content": prompt}));

        let mut payload = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });
        if let Some(temperature) = options.temperature {
            payload["temperature"] = serde_json::json!(temperature);
        }
        if let Some(max_tokens) = options.max_tokens {
            payload["max_tokens"] = serde_json::json!(max_tokens);
        }
        if options.json_output && self.kind == ProviderKind::OpenAI {
            payload["response_format"] = serde_json::json!({"type": "json_object"});
        }
        payload
    }

    fn parse_response(&self, json: &serde_json::Value) -> Result<ProviderReply, ProviderError> {
        if let Some(payload) = ErrorPayload::from_json(json) {
            return Ok(ProviderReply::ErrorPayload(payload));
        }

        let choice = &json["choices"][0];
        if choice["finish_reason"].as_str() == Some("content_filter") {
            return Ok(ProviderReply::ErrorPayload(ErrorPayload {
                kind: Some("content_filter".to_string()),
                message: "completion stopped by content filter".to_string(),
                ..Default::default()
            }));
        }

        let text = choice["message"]["content"]
            .as_str()
            .ok_or_else(|| ProviderError::ParseError("missing choices[0].message.content".to_string()))?
            .to_string();

        let usage = json.get("usage").and_then(|u| {
            Some(TokenUsage {
                input_tokens: u["prompt_tokens"].as_u64()? as u32,
                output_tokens: u["completion_tokens"].as_u64()? as u32,
            })
        });

        Ok(ProviderReply::Completion(Completion { text, usage }))
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn pricing(&self) -> Pricing {
        self.pricing
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<ProviderReply, ProviderError> {
        if self.kind == ProviderKind::OpenAI && self.api_key.is_none() {
            return Err(ProviderError::ConfigError(
                "No OpenAI API key configured".to_string(),
            ));
        }

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&self.build_payload(prompt, options));
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }
        request = request.timeout(options.timeout.unwrap_or(self.timeout));

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_status(status.as_u16(), body));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;
        self.parse_response(&json)
    }
}
