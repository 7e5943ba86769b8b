//! Stateless runtime for the fast and analytical tiers

use std::sync::Arc;

use async_trait::async_trait;

use super::{ErrorRecord, HandlerOutput, HandlerRegistry, Runtime, RuntimeOutcome, TaskContext};
use crate::{cache::ResponseCache, modes::RuntimeKind};

/// Runs a handler once. Fast-tier results go through the response cache.
pub struct StatelessRuntime {
    handlers: HandlerRegistry,
    cache: Arc<ResponseCache>,
}

impl StatelessRuntime {
    pub fn new(handlers: HandlerRegistry, cache: Arc<ResponseCache>) -> Self {
        Self { handlers, cache }
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }
}

#[async_trait]
impl Runtime for StatelessRuntime {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Stateless
    }

    async fn execute(&self, mut ctx: TaskContext) -> RuntimeOutcome {
        let decision = ctx.decision.clone();
        let mode = decision.mode();

        let handler = match self.handlers.resolve(mode.name()) {
            Ok(handler) => handler,
            Err(err) => {
                let record = ErrorRecord::new(&err, "dispatch", 0);
                return RuntimeOutcome {
                    result: Err(err),
                    errors: vec![record],
                };
            }
        };

        // Answers that depend on earlier turns are not reusable
        let cacheable = mode.tier().is_cacheable() && ctx.history.is_empty();

        if cacheable {
            if let Some(text) = self.cache.get(mode, ctx.query()).await {
                tracing::info!(mode = %mode.name(), "[STATELESS_RUNTIME] Served from cache");
                ctx.events.progress("cache", "Served from response cache");
                return RuntimeOutcome {
                    result: Ok(HandlerOutput {
                        text,
                        cached: true,
                        report_dir: None,
                    }),
                    errors: Vec::new(),
                };
            }
        }

        match handler.handle(&mut ctx).await {
            Ok(output) => {
                if cacheable {
                    self.cache.put(mode, ctx.query(), &output.text).await;
                }
                RuntimeOutcome {
                    result: Ok(output),
                    errors: Vec::new(),
                }
            }
            Err(err) => {
                tracing::warn!(
                    mode = %mode.name(),
                    "[STATELESS_RUNTIME] Handler failed: {}",
                    err
                );
                let record = ErrorRecord::new(&err, "handler", 0);
                RuntimeOutcome {
                    result: Err(err),
                    errors: vec![record],
                }
            }
        }
    }
}
