//! LLM access: provider adapters and the fallback client

pub mod anthropic;
pub mod client;
pub mod openai;
pub mod provider;

pub use client::{Generation, LlmClient, UsageMeter, UsageTotals};
pub use provider::{
    Completion, ErrorPayload, GenerationOptions, LlmProvider, Pricing, ProviderError,
    ProviderKind, ProviderReply, TokenUsage,
};
