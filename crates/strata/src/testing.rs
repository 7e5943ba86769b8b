//! Scripted collaborators for tests and offline demos.
//!
//! Each double records how it was called so tests can assert on call counts
//! and prompts without network access.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    llm::{
        Completion, ErrorPayload, GenerationOptions, LlmClient, LlmProvider, Pricing,
        ProviderError, ProviderKind, ProviderReply, TokenUsage,
    },
    sandbox::{CodeExecutor, ExecutionOutput, RenderedArtifact, SandboxError},
    search::{SearchError, SearchHit, SearchService},
};

type Responder = dyn Fn(&str) -> Result<ProviderReply, ProviderError> + Send + Sync;

/// Completion with fixed usage of 10 input and 5 output tokens
pub fn reply(text: impl Into<String>) -> ProviderReply {
    ProviderReply::Completion(Completion {
        text: text.into(),
        usage: Some(TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
        }),
    })
}

/// Client over the given providers, in order
pub fn client(providers: &[Arc<ScriptedProvider>]) -> LlmClient {
    LlmClient::new(
        providers
            .iter()
            .map(|p| p.clone() as Arc<dyn LlmProvider>)
            .collect(),
    )
}

/// Provider that answers from a script, then from an optional responder.
///
/// With neither left it reports itself unavailable.
pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<Result<ProviderReply, ProviderError>>>,
    responder: Option<Box<Responder>>,
    pricing: Pricing,
    delay: Option<Duration>,
    timeout: Option<Duration>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            responder: None,
            pricing: Pricing::default(),
            delay: None,
            timeout: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Always answers `text`
    pub fn replying(name: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self::responding(name, move |_| Ok(reply(text.clone())))
    }

    /// Always fails with `err`
    pub fn failing(name: impl Into<String>, err: ProviderError) -> Self {
        Self::responding(name, move |_| Err(err.clone()))
    }

    /// Answers by calling `responder` with the prompt
    pub fn responding<F>(name: impl Into<String>, responder: F) -> Self
    where
        F: Fn(&str) -> Result<ProviderReply, ProviderError> + Send + Sync + 'static,
    {
        let mut provider = Self::new(name);
        provider.responder = Some(Box::new(responder));
        provider
    }

    pub fn then_reply(self, text: impl Into<String>) -> Self {
        self.push(Ok(reply(text)))
    }

    pub fn then_fail(self, err: ProviderError) -> Self {
        self.push(Err(err))
    }

    /// Queue an in-band error object
    pub fn then_payload(self, payload: ErrorPayload) -> Self {
        self.push(Ok(ProviderReply::ErrorPayload(payload)))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Per-provider call budget, as a configured provider would report it
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_pricing(mut self, pricing: Pricing) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    fn push(self, entry: Result<ProviderReply, ProviderError>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(entry);
        }
        self
    }

    fn next(&self, prompt: &str) -> Result<ProviderReply, ProviderError> {
        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match (scripted, &self.responder) {
            (Some(entry), _) => entry,
            (None, Some(responder)) => responder(prompt),
            (None, None) => Err(ProviderError::NotAvailable(format!(
                "{} has no scripted replies left",
                self.name
            ))),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAI
    }

    fn model(&self) -> &str {
        "scripted"
    }

    fn pricing(&self) -> Pricing {
        self.pricing
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn generate(
        &self,
        prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<ProviderReply, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.next(prompt)
    }
}

/// Search backend with canned results
pub struct ScriptedSearch {
    outcome: Result<Vec<SearchHit>, SearchError>,
    /// Hits generated from the query itself, `n` per call
    per_query: Option<usize>,
    calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl ScriptedSearch {
    fn with_outcome(outcome: Result<Vec<SearchHit>, SearchError>) -> Self {
        Self {
            outcome,
            per_query: None,
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(err: SearchError) -> Self {
        Self::with_outcome(Err(err))
    }

    pub fn empty() -> Self {
        Self::with_outcome(Ok(Vec::new()))
    }

    pub fn with_hits(hits: Vec<SearchHit>) -> Self {
        Self::with_outcome(Ok(hits))
    }

    /// `n` distinct hits per query, with urls derived from the query text
    pub fn per_query(n: usize) -> Self {
        let mut search = Self::empty();
        search.per_query = Some(n);
        search
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .map(|q| q.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SearchService for ScriptedSearch {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, SearchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.to_string());
        }

        if let Some(n) = self.per_query {
            let slug: String = query
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
                .collect();
            return Ok((1..=n.min(limit))
                .map(|i| SearchHit {
                    url: format!("https://{}.example/{}", slug, i),
                    title: format!("{} #{}", query, i),
                    content: format!("Findings about {} from source {}", query, i),
                    published_date: None,
                })
                .collect());
        }

        self.outcome
            .clone()
            .map(|hits| hits.into_iter().take(limit).collect())
    }
}

/// Smallest valid PNG signature, enough for artifact handling
pub const PNG_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

enum SandboxBehavior {
    Figure,
    DegradedFigure,
    Raise(String),
    Unavailable,
}

/// Code executor that never runs anything.
///
/// Scripted outcomes are consumed first; after that every call gets the
/// default behavior.
pub struct ScriptedSandbox {
    behavior: SandboxBehavior,
    script: Mutex<VecDeque<Result<ExecutionOutput, String>>>,
    calls: AtomicUsize,
    codes: Mutex<Vec<String>>,
}

impl ScriptedSandbox {
    fn with_behavior(behavior: SandboxBehavior) -> Self {
        Self {
            behavior,
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            codes: Mutex::new(Vec::new()),
        }
    }

    /// Every run succeeds with one PNG figure
    pub fn rendering() -> Self {
        Self::with_behavior(SandboxBehavior::Figure)
    }

    /// Every run succeeds with one figure from a one-off fallback process
    pub fn degraded() -> Self {
        Self::with_behavior(SandboxBehavior::DegradedFigure)
    }

    /// Every run raises `traceback`
    pub fn raising(traceback: impl Into<String>) -> Self {
        Self::with_behavior(SandboxBehavior::Raise(traceback.into()))
    }

    pub fn unavailable() -> Self {
        Self::with_behavior(SandboxBehavior::Unavailable)
    }

    /// Queue one run that raises before the default behavior applies
    pub fn then_raise(self, traceback: impl Into<String>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Err(traceback.into()));
        }
        self
    }

    /// Queue one run that returns `output` as is
    pub fn then_output(self, output: ExecutionOutput) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Ok(output));
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn codes(&self) -> Vec<String> {
        self.codes
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    pub fn figure() -> ExecutionOutput {
        ExecutionOutput {
            artifacts: vec![RenderedArtifact {
                name: "figure_1.png".to_string(),
                mime: "image/png".to_string(),
                data: PNG_BYTES.to_vec(),
            }],
            elapsed: Duration::from_millis(12),
            ..Default::default()
        }
    }

    fn raised(traceback: String) -> ExecutionOutput {
        ExecutionOutput {
            error: Some(traceback),
            elapsed: Duration::from_millis(3),
            ..Default::default()
        }
    }
}

#[async_trait]
impl CodeExecutor for ScriptedSandbox {
    async fn is_available(&self) -> bool {
        !matches!(self.behavior, SandboxBehavior::Unavailable)
    }

    async fn execute(&self, code: &str, _timeout: Duration) -> Result<ExecutionOutput, SandboxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut codes) = self.codes.lock() {
            codes.push(code.to_string());
        }

        if let Some(entry) = self.script.lock().ok().and_then(|mut s| s.pop_front()) {
            return Ok(entry.unwrap_or_else(Self::raised));
        }

        match &self.behavior {
            SandboxBehavior::Figure => Ok(Self::figure()),
            SandboxBehavior::DegradedFigure => Ok(ExecutionOutput {
                degraded: true,
                ..Self::figure()
            }),
            SandboxBehavior::Raise(traceback) => Ok(Self::raised(traceback.clone())),
            SandboxBehavior::Unavailable => Err(SandboxError::Unavailable(
                "scripted sandbox is unavailable".to_string(),
            )),
        }
    }
}
