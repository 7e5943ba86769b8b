//! Request and response envelopes

use std::{collections::HashMap, path::PathBuf};

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::{events::LifecycleEvent, modes::CognitiveTier, runtime::ErrorRecord};

/// How the caller wants the mode chosen
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum ModeSelection {
    #[default]
    Auto,
    Explicit(String),
}

/// An incoming query
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct Request {
    pub query: String,
    #[serde(default)]
    pub mode: ModeSelection,
    /// Conversation to read history from and append to
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub trace_id: Uuid,
    #[serde(default)]
    #[ts(type = "Record<string, unknown>")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Request {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            mode: ModeSelection::Auto,
            conversation_id: None,
            trace_id: Uuid::new_v4(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = ModeSelection::Explicit(mode.into());
        self
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Completed,
    Failed,
}

/// Outcome of one request. Failures are reported in-band.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct Response {
    pub trace_id: Uuid,
    pub status: ResponseStatus,
    /// Result text, or the failure message when `status` is `failed`
    pub result: String,
    pub mode: String,
    pub tier: CognitiveTier,
    pub cached: bool,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub elapsed_ms: u64,
    /// Directory of the persisted research bundle, if one was written
    #[ts(type = "string | null")]
    pub report_dir: Option<PathBuf>,
    pub errors: Vec<ErrorRecord>,
    pub events: Vec<LifecycleEvent>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builders() {
        let request = Request::new("What is 2+2?")
            .with_mode("chat")
            .with_conversation("conv-1")
            .with_metadata("source", serde_json::json!("cli"));

        assert_eq!(request.mode, ModeSelection::Explicit("chat".to_string()));
        assert_eq!(request.conversation_id.as_deref(), Some("conv-1"));
        assert_eq!(request.metadata["source"], "cli");
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: Request = serde_json::from_value(serde_json::json!({
            "query": "hello",
            "trace_id": "00000000-0000-0000-0000-000000000000"
        }))
        .unwrap();
        assert_eq!(request.mode, ModeSelection::Auto);
        assert!(request.metadata.is_empty());
    }
}
