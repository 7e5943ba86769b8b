//! Deep-research workflow for the agentic tier
//!
//! Plan -> iterate(search -> synthesize -> review) -> chart planning ->
//! chart execution -> report -> persist. Failures in planning, research or
//! report writing propagate to the stateful runtime, which retries the whole
//! workflow. Chart failures stay inside the workflow and persistence falls
//! back to writing the report alone.

pub mod charts;
pub mod planner;
pub mod prompts;
pub mod report;
pub mod synthesis;
pub mod types;

use std::{collections::HashSet, sync::Arc, time::Duration};

use chrono::Utc;
use futures::{stream, StreamExt};
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use uuid::Uuid;

pub use types::{
    ChartSpec, CompletenessReview, ComputationResult, Coverage, EvidenceLedger, Gap, Outline,
    Priority, ReportBundle, ReportMetadata, SearchTask, Section, SectionCoverage, Synthesis,
};

use crate::{
    config::ResearchConfig,
    error::Result,
    events::RequestEvents,
    llm::{GenerationOptions, LlmClient, UsageMeter},
    runtime::{HandlerOutput, TaskContext, WorkflowState, WorkflowStep},
    sandbox::CodeExecutor,
    search::{SearchError, SearchHit, SearchService},
};

/// Hard cap on research iterations regardless of configuration
pub const MAX_ITERATIONS: u32 = 3;

/// Per-request values shared by every step of one run
pub(crate) struct RunScope<'a> {
    pub query: &'a str,
    pub trace_id: Uuid,
    pub events: &'a RequestEvents,
    pub usage: &'a UsageMeter,
}

/// What the research loop accumulated
#[derive(Debug, Clone, Default)]
pub struct ResearchOutcome {
    pub ledger: EvidenceLedger,
    pub synthesis: Synthesis,
    /// Every query issued, in order
    pub queries: Vec<String>,
    pub iterations: u32,
}

pub struct DeepResearchWorkflow {
    llm: LlmClient,
    search: Arc<dyn SearchService>,
    sandbox: Option<Arc<dyn CodeExecutor>>,
    settings: ResearchConfig,
}

impl DeepResearchWorkflow {
    pub fn new(llm: LlmClient, search: Arc<dyn SearchService>, settings: ResearchConfig) -> Self {
        Self {
            llm,
            search,
            sandbox: None,
            settings,
        }
    }

    pub fn with_sandbox(mut self, sandbox: Arc<dyn CodeExecutor>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn settings(&self) -> &ResearchConfig {
        &self.settings
    }

    fn max_iterations(&self) -> u32 {
        self.settings.max_iterations.clamp(1, MAX_ITERATIONS)
    }

    /// One model call with the research system prompt and timeout
    pub(crate) async fn ask(&self, scope: &RunScope<'_>, prompt: String, json: bool) -> Result<String> {
        let mut options = GenerationOptions::default()
            .with_system(prompts::SYSTEM)
            .with_timeout(Duration::from_secs(self.settings.llm_timeout_secs));
        if json {
            options = options.json();
        }
        let generation = self
            .llm
            .generate_metered(&prompt, &options, scope.usage)
            .await?;
        tracing::debug!(
            provider = %generation.provider,
            chars = generation.text.len(),
            "[DEEP_RESEARCH] Model call finished"
        );
        Ok(generation.text)
    }

    /// Run the workflow for the request in `ctx`.
    ///
    /// The step pointer lives in `ctx.workflow` so a failure can be
    /// attributed to the step that was running.
    pub async fn run(&self, ctx: &mut TaskContext) -> Result<HandlerOutput> {
        let request = ctx.request.clone();
        let events = ctx.events.clone();
        let usage = ctx.usage.clone();
        let scope = RunScope {
            query: &request.query,
            trace_id: request.trace_id,
            events: &events,
            usage: &usage,
        };

        let mut workflow = ctx
            .workflow
            .take()
            .unwrap_or_else(|| WorkflowState::research(0));
        let result = self.drive(&scope, &mut workflow).await;
        ctx.workflow = Some(workflow);
        result
    }

    async fn drive(&self, scope: &RunScope<'_>, workflow: &mut WorkflowState) -> Result<HandlerOutput> {
        let started = Instant::now();
        let started_at = Utc::now();
        tracing::info!(
            trace_id = %scope.trace_id,
            attempt = workflow.attempt(),
            "[DEEP_RESEARCH] Starting research: {}",
            scope.query
        );

        workflow.enter(WorkflowStep::Plan);
        scope.events.progress("plan", "Planning report outline");
        let outline = self.plan_outline(scope).await?;
        tracing::info!(
            sections = outline.sections.len(),
            "[DEEP_RESEARCH] Outline ready: {}",
            outline.title
        );

        workflow.enter(WorkflowStep::Research);
        let research = self.research_loop(scope, &outline, workflow).await?;

        workflow.enter(WorkflowStep::ChartPlanning);
        scope.events.progress("chart_planning", "Planning charts");
        let specs = self.plan_charts(scope, &outline, &research.synthesis).await;

        workflow.enter(WorkflowStep::ChartExecution);
        let charts = self.execute_charts(scope, specs, &research.synthesis).await;

        workflow.enter(WorkflowStep::Report);
        scope.events.progress("report", "Writing final report");
        let text = self
            .write_report(scope, &outline, &research, &charts.results)
            .await?;

        workflow.enter(WorkflowStep::Persist);
        scope.events.progress("persist", "Saving report");
        let bundle = report::build_bundle(
            text,
            report::BundleInfo {
                trace_id: scope.trace_id,
                query: scope.query,
                outline: &outline,
                research: &research,
                started_at,
                duration: started.elapsed(),
            },
            &charts.results,
        );
        let dir = self
            .settings
            .output_dir
            .join(report::run_dir_name(scope.trace_id, started_at));
        let report_dir = report::persist_bundle(&dir, &bundle).await;

        tracing::info!(
            trace_id = %scope.trace_id,
            iterations = research.iterations,
            sources = bundle.metadata.sources.len(),
            charts = charts.results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "[DEEP_RESEARCH] Research complete"
        );

        Ok(HandlerOutput {
            text: bundle.report,
            cached: false,
            report_dir,
        })
    }

    /// Search, synthesize and review until sufficient, out of budget or out
    /// of iterations.
    async fn research_loop(
        &self,
        scope: &RunScope<'_>,
        outline: &Outline,
        workflow: &mut WorkflowState,
    ) -> Result<ResearchOutcome> {
        let max_iterations = self.max_iterations();
        let mut outcome = ResearchOutcome {
            synthesis: Synthesis {
                coverage: types::compute_coverage(outline, &EvidenceLedger::new()),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut issued = HashSet::new();

        for _ in 0..max_iterations {
            let remaining = self
                .settings
                .max_total_queries
                .saturating_sub(outcome.queries.len());
            if remaining == 0 {
                tracing::info!("[DEEP_RESEARCH] Query budget exhausted");
                break;
            }

            let iteration = workflow.next_iteration();
            outcome.iterations = iteration;
            scope.events.progress(
                "research",
                format!("Research iteration {} of {}", iteration, max_iterations),
            );

            let tasks = self
                .plan_search_tasks(
                    scope,
                    outline,
                    &outcome.synthesis.gaps,
                    &outcome.queries,
                    &mut issued,
                    self.settings.queries_per_iteration.min(remaining),
                )
                .await?;
            if tasks.is_empty() {
                tracing::info!(iteration, "[DEEP_RESEARCH] No new queries left to run");
                break;
            }
            outcome.queries.extend(tasks.iter().map(|t| t.query.clone()));

            // The whole batch finishes before synthesis sees any of it
            let results = self.run_search_batch(&tasks).await;
            let mut failures = Vec::new();
            let mut added = 0;
            for (task, result) in tasks.iter().zip(results) {
                match result {
                    Ok(hits) => added += outcome.ledger.absorb(task, hits),
                    Err(err) => failures.push(err),
                }
            }
            tracing::info!(
                iteration,
                queries = tasks.len(),
                failed = failures.len(),
                new_evidence = added,
                "[DEEP_RESEARCH] Search batch finished"
            );
            if outcome.ledger.is_empty() && failures.len() == tasks.len() {
                if let Some(err) = failures.pop() {
                    return Err(err.into());
                }
            }

            scope.events.progress(
                "synthesis",
                format!("Synthesizing {} sources", outcome.ledger.len()),
            );
            outcome.synthesis = self
                .synthesize(scope, outline, &outcome.ledger, &outcome.synthesis)
                .await?;

            let review = self
                .review_completeness(scope, outline, &outcome.synthesis)
                .await?;
            outcome.synthesis.gaps = review.gaps;
            if review.sufficient {
                tracing::info!(iteration, "[DEEP_RESEARCH] Research judged sufficient");
                break;
            }
        }

        Ok(outcome)
    }

    /// Run a batch of searches with bounded parallelism, results in task order
    async fn run_search_batch(&self, tasks: &[SearchTask]) -> Vec<std::result::Result<Vec<SearchHit>, SearchError>> {
        let timeout = Duration::from_secs(self.settings.search_timeout_secs);
        let limit = self.settings.results_per_query;
        let parallelism = self.settings.search_parallelism.max(1);

        let queries: Vec<String> = tasks.iter().map(|task| task.query.clone()).collect();
        let search = self.search.clone();

        stream::iter(queries.into_iter().map(move |query| {
            let search = search.clone();
            async move {
                match tokio::time::timeout(timeout, search.search(&query, limit)).await {
                    Ok(result) => result,
                    Err(_) => Err(SearchError::Timeout(timeout)),
                }
            }
        }))
        .buffered(parallelism)
        .collect()
        .await
    }
}

/// Slice out the JSON value in a model answer, ignoring code fences and
/// surrounding prose
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let end = text.rfind(['}', ']'])?;
    (end > start).then(|| &text[start..=end])
}

/// Parse a model answer as `T`, `None` when it holds no usable JSON
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Option<T> {
    serde_json::from_str(extract_json(text)?).ok()
}

/// Code from the first fenced block, or the whole answer when unfenced
pub fn extract_code(text: &str) -> String {
    let Some(open) = text.find("```") else {
        return text.trim().to_string();
    };
    let after_fence = &text[open + 3..];
    let body = match after_fence.find('\n') {
        Some(newline) => &after_fence[newline + 1..],
        None => after_fence,
    };
    match body.find("```") {
        Some(close) => body[..close].trim().to_string(),
        None => body.trim().to_string(),
    }
}
