//! Stateful runtime for the agentic tier

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ErrorRecord, HandlerRegistry, Runtime, RuntimeOutcome, TaskContext, WorkflowState};
use crate::{modes::RuntimeKind, retry::RetryPolicy};

/// Runs whole workflow attempts under the classified retry policy.
///
/// Each attempt starts from a fresh [`WorkflowState`]. Only whole attempts
/// are retried, never individual steps.
pub struct StatefulRuntime {
    handlers: HandlerRegistry,
    retry: RetryPolicy,
}

impl StatefulRuntime {
    pub fn new(handlers: HandlerRegistry, retry: RetryPolicy) -> Self {
        Self { handlers, retry }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }
}

#[async_trait]
impl Runtime for StatefulRuntime {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Stateful
    }

    async fn execute(&self, ctx: TaskContext) -> RuntimeOutcome {
        let mode_name = ctx.decision.mode().name().to_string();

        let handler = match self.handlers.resolve(&mode_name) {
            Ok(handler) => handler,
            Err(err) => {
                let record = ErrorRecord::new(&err, "dispatch", 0);
                return RuntimeOutcome {
                    result: Err(err),
                    errors: vec![record],
                };
            }
        };

        let records = Arc::new(Mutex::new(Vec::new()));
        let max_attempts = self.retry.max_retries + 1;

        let result = self
            .retry
            .run(|attempt| {
                let handler = handler.clone();
                let records = records.clone();
                let mut ctx = ctx.clone();
                let mode_name = mode_name.clone();
                async move {
                    ctx.workflow = Some(WorkflowState::research(attempt));
                    if attempt > 0 {
                        ctx.events.progress(
                            "retry",
                            format!("Retrying workflow (attempt {} of {})", attempt + 1, max_attempts),
                        );
                    }
                    tracing::info!(
                        mode = %mode_name,
                        attempt = attempt + 1,
                        max_attempts,
                        "[STATEFUL_RUNTIME] Starting workflow attempt"
                    );

                    let result = handler.handle(&mut ctx).await;
                    let workflow = ctx
                        .workflow
                        .get_or_insert_with(|| WorkflowState::research(attempt));
                    match &result {
                        Ok(_) => workflow.complete(),
                        Err(err) => {
                            let record = workflow.fail(err);
                            tracing::warn!(
                                mode = %mode_name,
                                attempt = attempt + 1,
                                step = %record.step,
                                category = %record.category,
                                "[STATEFUL_RUNTIME] Workflow attempt failed: {}",
                                record.message
                            );
                            records.lock().await.push(record);
                        }
                    }
                    result
                }
            })
            .await;

        let errors = records.lock().await.clone();
        RuntimeOutcome { result, errors }
    }
}
