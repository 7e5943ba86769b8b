//! Runtimes and task handlers
//!
//! A handler implements one mode. A runtime decides how handlers run: the
//! stateless runtime calls them once behind the response cache, the stateful
//! runtime wraps whole workflow attempts in classified retries.

pub mod handlers;
pub mod state;
pub mod stateful;
pub mod stateless;

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use async_trait::async_trait;

pub use handlers::{AnalyticalHandler, ChatHandler, DeepResearchHandler, KnowledgeHandler};
pub use state::{ErrorRecord, WorkflowState, WorkflowStatus, WorkflowStep};
pub use stateful::StatefulRuntime;
pub use stateless::StatelessRuntime;

use crate::{
    error::{Result, StrataError},
    events::RequestEvents,
    llm::UsageMeter,
    modes::RuntimeKind,
    request::Request,
    router::RoutingDecision,
};

/// Everything a handler needs for one request
#[derive(Clone)]
pub struct TaskContext {
    pub request: Arc<Request>,
    pub decision: Arc<RoutingDecision>,
    pub events: RequestEvents,
    pub usage: UsageMeter,
    /// Rendered conversation history, empty for a fresh conversation
    pub history: String,
    /// Set by the stateful runtime for each attempt
    pub workflow: Option<WorkflowState>,
}

impl TaskContext {
    pub fn new(request: Request, decision: RoutingDecision, events: RequestEvents) -> Self {
        Self {
            request: Arc::new(request),
            decision: Arc::new(decision),
            events,
            usage: UsageMeter::new(),
            history: String::new(),
            workflow: None,
        }
    }

    pub fn with_history(mut self, history: String) -> Self {
        self.history = history;
        self
    }

    pub fn query(&self) -> &str {
        &self.request.query
    }

    /// Prompt prefix with the conversation so far followed by the query
    pub fn prompt_with_history(&self) -> String {
        if self.history.is_empty() {
            self.request.query.clone()
        } else {
            format!(
                "{}\n\nUser: {}",
                self.history.trim_end(),
                self.request.query
            )
        }
    }
}

/// What a handler produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerOutput {
    pub text: String,
    pub cached: bool,
    pub report_dir: Option<PathBuf>,
}

impl HandlerOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// One mode's processing strategy
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, ctx: &mut TaskContext) -> Result<HandlerOutput>;
}

/// Handlers keyed by mode name
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, mode: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(mode.into(), handler);
    }

    pub fn with(mut self, mode: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        self.register(mode, handler);
        self
    }

    pub fn resolve(&self, mode: &str) -> Result<Arc<dyn TaskHandler>> {
        self.handlers
            .get(mode)
            .cloned()
            .ok_or_else(|| StrataError::MissingHandler(mode.to_string()))
    }

    pub fn contains(&self, mode: &str) -> bool {
        self.handlers.contains_key(mode)
    }
}

/// Result of running a request through a runtime
#[derive(Debug)]
pub struct RuntimeOutcome {
    pub result: Result<HandlerOutput>,
    /// Every classified failure seen, including ones a retry recovered from
    pub errors: Vec<ErrorRecord>,
}

#[async_trait]
pub trait Runtime: Send + Sync {
    fn kind(&self) -> RuntimeKind;

    async fn execute(&self, ctx: TaskContext) -> RuntimeOutcome;
}
