//! Anthropic Messages API provider

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::provider::{
    error_from_status, Completion, ErrorPayload, GenerationOptions, LlmProvider, Pricing,
    ProviderError, ProviderKind, ProviderReply, TokenUsage,
};
use crate::config::ProviderConfig;

const ANTHROPIC_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    client: Client,
    name: String,
    model: String,
    api_key: Option<String>,
    endpoint: String,
    pricing: Pricing,
    timeout: Duration,
}

impl AnthropicProvider {
    pub fn from_config(client: Client, config: &ProviderConfig) -> Self {
        let api_key = config.api_key();
        if api_key.is_none() {
            tracing::warn!("[LLM_CLIENT] Anthropic provider created without API key");
        }

        Self {
            client,
            name: format!("anthropic:{}", config.model),
            model: config.model.clone(),
            api_key,
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_else(|| ANTHROPIC_ENDPOINT.to_string()),
            pricing: config.pricing(),
            timeout: config.timeout(),
        }
    }

    fn build_payload(&self, prompt: &str, options: &GenerationOptions) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "model": self.model,
            "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": [{"role": "user", "content": prompt}],
        });
        if let Some(system) = &options.system {
            payload["system"] = serde_json::json!(system);
        }
        if let Some(temperature) = options.temperature {
            payload["temperature"] = serde_json::json!(temperature);
        }
        payload
    }

    fn parse_response(&self, json: &serde_json::Value) -> Result<ProviderReply, ProviderError> {
        if let Some(payload) = ErrorPayload::from_json(json) {
            return Ok(ProviderReply::ErrorPayload(payload));
        }

        let blocks = json["content"]
            .as_array()
            .ok_or_else(|| ProviderError::ParseError("missing content array".to_string()))?;
        let text = blocks
            .iter()
            .filter(|block| block["type"] == "text")
            .filter_map(|block| block["text"].as_str())
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() && json["stop_reason"].as_str() == Some("refusal") {
            return Ok(ProviderReply::ErrorPayload(ErrorPayload {
                kind: Some("content_filter".to_string()),
                message: "model refused the request".to_string(),
                ..Default::default()
            }));
        }

        let usage = json.get("usage").and_then(|u| {
            Some(TokenUsage {
                input_tokens: u["input_tokens"].as_u64()? as u32,
                output_tokens: u["output_tokens"].as_u64()? as u32,
            })
        });

        Ok(ProviderReply::Completion(Completion { text, usage }))
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
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
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            ProviderError::ConfigError("No Anthropic API key configured".to_string())
        })?;

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&self.build_payload(prompt, options));
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

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn provider() -> AnthropicProvider {
        let config = ProviderConfig {
            kind: ProviderKind::Anthropic,
            model: "claude-test".to_string(),
            endpoint: None,
            api_key_env: Some("STRATA_TEST_UNSET_KEY".to_string()),
            timeout_secs: 5,
            input_cost_per_mtok: 3.0,
            output_cost_per_mtok: 15.0,
        };
        AnthropicProvider::from_config(Client::new(), &config)
    }

    #[test]
    fn test_configured_timeout_is_reported() {
        assert_eq!(provider().timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_text_blocks_are_joined() {
        let reply = provider()
            .parse_response(&json!({
                "content": [
                    {"type": "text", "text": "Hello, "},
                    {"type": "tool_use", "id": "x", "name": "noop", "input": {}},
                    {"type": "text", "text": "world"}
                ],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 10, "output_tokens": 3}
            }))
            .unwrap();

        let ProviderReply::Completion(completion) = reply else {
            panic!("expected completion");
        };
        assert_eq!(completion.text, "Hello, world");
        assert_eq!(completion.usage.unwrap().total(), 13);
    }

    #[test]
    fn test_overloaded_envelope() {
        let reply = provider()
            .parse_response(&json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}))
            .unwrap();
        let ProviderReply::ErrorPayload(payload) = reply else {
            panic!("expected error payload");
        };
        assert!(matches!(payload.into_error(), ProviderError::NotAvailable(_)));
    }

    #[test]
    fn test_system_prompt_is_top_level() {
        let payload = provider().build_payload(
            "question",
            &GenerationOptions::default().with_system("be brief"),
        );
        assert_eq!(payload["system"], "be brief");
        assert_eq!(payload["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(payload["messages"][0]["content"], "question");
    }
}
