//! # Strata - tiered request engine
//!
//! Routes each query to a processing mode by complexity. Fast and analytical
//! modes run once on the stateless runtime, with fast-tier answers served
//! from a TTL cache. Agentic modes run on the stateful runtime, which retries
//! whole workflows on transient failures. The deep-research workflow plans,
//! searches, synthesizes, renders charts in a persistent code sandbox and
//! persists a report bundle.

pub mod cache;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod knowledge;
pub mod llm;
pub mod modes;
pub mod request;
pub mod research;
pub mod retry;
pub mod router;
pub mod runtime;
pub mod sandbox;
pub mod search;
#[doc(hidden)]
pub mod testing;

#[cfg(test)]
mod engine_tests;
#[cfg(test)]
mod research_tests;
#[cfg(test)]
mod sandbox_tests;

pub use cache::{CacheKey, CacheStats, CachedResponse, ResponseCache};
pub use config::{
    CacheConfig, ConversationConfig, ProviderConfig, ResearchConfig, RetryConfig, SandboxConfig,
    SandboxRuntime, SearchConfig, StrataConfig,
};
pub use context::{ConversationStore, Turn};
pub use engine::{Engine, EngineBuilder};
pub use error::{Classify, ErrorCategory, ProviderAttempt, Result, StrataError};
pub use events::{EventBroadcaster, LifecycleEvent, RequestEvents};
pub use knowledge::{InMemoryKnowledgeBase, KnowledgeBase, Passage};
pub use llm::{
    Generation, GenerationOptions, LlmClient, LlmProvider, Pricing, ProviderError, ProviderKind,
    TokenUsage, UsageMeter, UsageTotals,
};
pub use modes::{CognitiveTier, ModeProfile, ModeRegistry, ProcessingMode, RuntimeKind};
pub use request::{ModeSelection, Request, Response, ResponseStatus};
pub use research::{DeepResearchWorkflow, ReportBundle, ReportMetadata};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use router::{ComplexityRouter, ComplexityScore, RoutingDecision, ToolHint};
pub use runtime::{
    ErrorRecord, HandlerOutput, HandlerRegistry, Runtime, RuntimeOutcome, StatefulRuntime,
    StatelessRuntime, TaskContext, TaskHandler, WorkflowState, WorkflowStatus, WorkflowStep,
};
pub use sandbox::{CodeExecutor, ExecutionOutput, PersistentSandbox, SandboxError};
pub use search::{ExaSearch, FallbackSearch, SearchError, SearchHit, SearchService};
