//! Request entry point
//!
//! [`Engine::process`] and [`Engine::process_streaming`] share one execution
//! path; streaming only attaches an event sink. Every request ends with a
//! well-formed [`Response`], failures included.

use std::sync::Arc;

use tokio::{sync::mpsc, time::Instant};

use crate::{
    cache::ResponseCache,
    config::StrataConfig,
    context::ConversationStore,
    error::{Classify, ErrorCategory, StrataError},
    events::{EventBroadcaster, LifecycleEvent, RequestEvents},
    knowledge::KnowledgeBase,
    llm::LlmClient,
    modes::{ModeRegistry, RuntimeKind},
    request::{ModeSelection, Request, Response, ResponseStatus},
    research::DeepResearchWorkflow,
    router::{ComplexityRouter, RoutingDecision},
    runtime::{
        ErrorRecord, HandlerRegistry, Runtime, RuntimeOutcome, StatefulRuntime, StatelessRuntime,
        TaskContext, TaskHandler,
    },
    sandbox::{CodeExecutor, PersistentSandbox},
    search::{ExaSearch, FallbackSearch, SearchService},
};

/// Assembles an [`Engine`], with optional replacements for its collaborators
pub struct EngineBuilder {
    config: StrataConfig,
    llm: Option<LlmClient>,
    search: Option<Arc<dyn SearchService>>,
    knowledge: Option<Arc<dyn KnowledgeBase>>,
    sandbox: Option<Option<Arc<dyn CodeExecutor>>>,
    modes: Option<ModeRegistry>,
    handlers: Vec<(String, Arc<dyn TaskHandler>)>,
    broadcaster: Option<EventBroadcaster>,
}

impl EngineBuilder {
    pub fn new(config: StrataConfig) -> Self {
        Self {
            config,
            llm: None,
            search: None,
            knowledge: None,
            sandbox: None,
            modes: None,
            handlers: Vec::new(),
            broadcaster: None,
        }
    }

    pub fn with_llm(mut self, llm: LlmClient) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_search(mut self, search: Arc<dyn SearchService>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeBase>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub fn with_sandbox(mut self, sandbox: Arc<dyn CodeExecutor>) -> Self {
        self.sandbox = Some(Some(sandbox));
        self
    }

    /// Run without a code sandbox; research skips chart execution
    pub fn without_sandbox(mut self) -> Self {
        self.sandbox = Some(None);
        self
    }

    pub fn with_modes(mut self, modes: ModeRegistry) -> Self {
        self.modes = Some(modes);
        self
    }

    /// Replace the handler of one mode
    pub fn with_handler(mut self, mode: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.push((mode.into(), handler));
        self
    }

    pub fn with_broadcaster(mut self, broadcaster: EventBroadcaster) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn build(self) -> Engine {
        let config = self.config;

        let llm = self
            .llm
            .unwrap_or_else(|| LlmClient::from_config(&config.providers));
        let search = self.search.unwrap_or_else(|| {
            Arc::new(FallbackSearch::new(vec![Arc::new(ExaSearch::from_config(
                &config.search,
            ))]))
        });
        let sandbox = self.sandbox.unwrap_or_else(|| {
            config.sandbox.enabled.then(|| {
                Arc::new(PersistentSandbox::new(config.sandbox.clone())) as Arc<dyn CodeExecutor>
            })
        });

        let mut workflow = DeepResearchWorkflow::new(llm.clone(), search, config.research.clone());
        if let Some(sandbox) = &sandbox {
            workflow = workflow.with_sandbox(sandbox.clone());
        }

        let mut handlers = HandlerRegistry::standard(llm, self.knowledge, Arc::new(workflow));
        for (mode, handler) in self.handlers {
            handlers.register(mode, handler);
        }

        let cache = Arc::new(ResponseCache::new(
            config.cache.max_entries,
            config.cache.ttl(),
        ));

        Engine {
            router: ComplexityRouter::new(self.modes.unwrap_or_else(ModeRegistry::standard)),
            stateless: Arc::new(StatelessRuntime::new(handlers.clone(), cache.clone())),
            stateful: Arc::new(StatefulRuntime::new(handlers, config.retry.policy())),
            cache,
            conversations: Arc::new(ConversationStore::from_config(&config.conversations)),
            broadcaster: self.broadcaster.unwrap_or_default(),
            sandbox,
        }
    }
}

pub struct Engine {
    router: ComplexityRouter,
    stateless: Arc<StatelessRuntime>,
    stateful: Arc<StatefulRuntime>,
    cache: Arc<ResponseCache>,
    conversations: Arc<ConversationStore>,
    broadcaster: EventBroadcaster,
    sandbox: Option<Arc<dyn CodeExecutor>>,
}

impl Engine {
    pub fn builder(config: StrataConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn from_config(config: StrataConfig) -> Self {
        EngineBuilder::new(config).build()
    }

    pub fn router(&self) -> &ComplexityRouter {
        &self.router
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn conversations(&self) -> &Arc<ConversationStore> {
        &self.conversations
    }

    pub fn sandbox(&self) -> Option<&Arc<dyn CodeExecutor>> {
        self.sandbox.as_ref()
    }

    /// Events of every request processed from now on
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<LifecycleEvent> {
        self.broadcaster.subscribe()
    }

    pub fn route(&self, query: &str, selection: &ModeSelection) -> RoutingDecision {
        self.router.route_query(query, selection)
    }

    /// Process a request to completion
    pub async fn process(&self, request: Request) -> Response {
        self.execute(request, None).await
    }

    /// Process a request, sending lifecycle events to `sink` as they happen
    pub async fn process_streaming(
        &self,
        request: Request,
        sink: mpsc::UnboundedSender<LifecycleEvent>,
    ) -> Response {
        self.execute(request, Some(sink)).await
    }

    /// Stop long-lived resources such as the sandbox process
    pub async fn shutdown(&self) {
        if let Some(sandbox) = &self.sandbox {
            sandbox.shutdown().await;
        }
    }

    async fn execute(
        &self,
        request: Request,
        sink: Option<mpsc::UnboundedSender<LifecycleEvent>>,
    ) -> Response {
        let started = Instant::now();
        let trace_id = request.trace_id;

        let mut events = RequestEvents::new(trace_id).with_broadcaster(self.broadcaster.clone());
        if let Some(sink) = sink {
            events = events.with_stream(sink);
        }

        let decision = self.router.route(&request);
        let mode = decision.mode().clone();
        events.start(mode.name(), mode.tier());
        tracing::info!(
            trace_id = %trace_id,
            mode = %mode.name(),
            tier = %mode.tier(),
            confidence = decision.confidence(),
            "[ENGINE] Processing request"
        );

        let history = match &request.conversation_id {
            Some(id) => self.conversations.render(id).await,
            None => String::new(),
        };
        let conversation_id = request.conversation_id.clone();
        let query = request.query.clone();

        let ctx = TaskContext::new(request, decision, events.clone()).with_history(history);
        let usage = ctx.usage.clone();
        let runtime: Arc<dyn Runtime> = match mode.runtime() {
            RuntimeKind::Stateless => self.stateless.clone(),
            RuntimeKind::Stateful => self.stateful.clone(),
        };

        // A panicking handler still yields a response
        let outcome = match tokio::spawn(async move { runtime.execute(ctx).await }).await {
            Ok(outcome) => outcome,
            Err(join_error) => {
                let err = StrataError::Internal(format!("request task failed: {}", join_error));
                RuntimeOutcome {
                    errors: vec![ErrorRecord::new(&err, "dispatch", 0)],
                    result: Err(err),
                }
            }
        };

        let totals = usage.totals();
        let (status, result, cached, report_dir) = match outcome.result {
            Ok(output) => {
                events.result(output.text.clone());
                if let Some(id) = &conversation_id {
                    self.conversations
                        .append(id, query, output.text.clone(), mode.name())
                        .await;
                }
                (
                    ResponseStatus::Completed,
                    output.text,
                    output.cached,
                    output.report_dir,
                )
            }
            Err(err) => {
                let category = err.category();
                let message = failure_message(&err, category);
                tracing::error!(
                    trace_id = %trace_id,
                    mode = %mode.name(),
                    category = %category,
                    "[ENGINE] Request failed: {}",
                    err
                );
                events.error(category, message.clone());
                (ResponseStatus::Failed, message, false, None)
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        events.end(elapsed_ms);
        tracing::info!(
            trace_id = %trace_id,
            status = ?status,
            cached,
            elapsed_ms,
            "[ENGINE] Request finished"
        );

        Response {
            trace_id,
            status,
            result,
            mode: mode.name().to_string(),
            tier: mode.tier(),
            cached,
            input_tokens: totals.input_tokens,
            output_tokens: totals.output_tokens,
            cost_usd: totals.cost_usd,
            elapsed_ms,
            report_dir,
            errors: outcome.errors,
            events: events.snapshot(),
        }
    }
}

/// User-facing text for a failed request
fn failure_message(err: &StrataError, category: ErrorCategory) -> String {
    match category {
        ErrorCategory::Network | ErrorCategory::Provider => {
            format!("The request could not be completed because the model or search services are unavailable: {}", err)
        }
        ErrorCategory::ResourceLimit => {
            format!("The request exceeded a resource limit: {}", err)
        }
        ErrorCategory::Business => format!("The request could not be processed: {}", err),
        ErrorCategory::Unknown => format!("The request failed unexpectedly: {}", err),
    }
}
