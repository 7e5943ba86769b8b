//! Tests for the deep-research workflow

#[cfg(test)]
mod tests {
    use std::{
        path::Path,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    use crate::{
        config::ResearchConfig,
        error::StrataError,
        events::{LifecycleEvent, RequestEvents},
        llm::{ProviderError, ProviderReply},
        modes::{self, CognitiveTier},
        request::Request,
        research::{
            prompts::{
                TASK_CHART_CODE, TASK_CHART_PLAN, TASK_CHART_REPAIR, TASK_COMPLETENESS,
                TASK_OUTLINE, TASK_REPORT, TASK_SEARCH_TASKS, TASK_SYNTHESIS,
            },
            report::{METADATA_FILE, REPORT_FILE},
            DeepResearchWorkflow,
        },
        router::ComplexityRouter,
        runtime::{TaskContext, WorkflowStep},
        search::SearchError,
        testing::{client, reply, ScriptedProvider, ScriptedSandbox, ScriptedSearch},
    };

    const OUTLINE: &str = r#"{"title": "Solar in 2024", "sections": [
        {"title": "Market", "focus": "Installed capacity"},
        {"title": "Policy", "focus": "Subsidies"}
    ]}"#;

    const CHART_PLAN: &str = r#"{"charts": [
        {"title": "Capacity", "kind": "bar", "data_description": "GW per year", "section": "Market"},
        {"title": "Subsidy levels", "kind": "line", "section": "Policy"},
        {"title": "Cost split", "kind": "pie", "section": "Market"}
    ]}"#;

    const REPORT: &str = "# Solar in 2024\n\n## Market\nCapacity grew.\n\n![Capacity](chart://1)\n\n## Policy\nSubsidies shrank.\n\n## Sources\n[1] https://a.example";

    struct Script {
        sufficient: bool,
        charts: &'static str,
    }

    /// Answers each research step by its prompt marker. Search tasks get a
    /// fresh query per call so every iteration has something new to run.
    fn researcher(script: Script) -> Arc<ScriptedProvider> {
        let planned = Arc::new(AtomicUsize::new(0));
        Arc::new(ScriptedProvider::responding("researcher", move |prompt| {
            let text = if prompt.starts_with(TASK_OUTLINE) {
                OUTLINE.to_string()
            } else if prompt.starts_with(TASK_SEARCH_TASKS) {
                let n = planned.fetch_add(1, Ordering::SeqCst);
                format!(
                    r#"{{"tasks": [
                        {{"query": "solar capacity round {n}", "section": "market", "priority": "high"}},
                        {{"query": "solar subsidies round {n}", "section": "Policy"}}
                    ]}}"#
                )
            } else if prompt.starts_with(TASK_SYNTHESIS) {
                "Capacity grew while subsidies shrank.".to_string()
            } else if prompt.starts_with(TASK_COMPLETENESS) {
                format!(
                    r#"{{"sufficient": {}, "gaps": [], "rationale": "checked"}}"#,
                    script.sufficient
                )
            } else if prompt.starts_with(TASK_CHART_PLAN) {
                script.charts.to_string()
            } else if prompt.starts_with(TASK_CHART_CODE) {
                "```python\nplt.bar([2022, 2023], [1, 2])\n```".to_string()
            } else if prompt.starts_with(TASK_CHART_REPAIR) {
                "```python\nplt.plot([2022, 2023], [1, 2])\n```".to_string()
            } else if prompt.starts_with(TASK_REPORT) {
                REPORT.to_string()
            } else {
                return Err(ProviderError::InvalidRequest("unexpected prompt".to_string()));
            };
            Ok::<ProviderReply, ProviderError>(reply(text))
        }))
    }

    fn settings(output_dir: &Path) -> ResearchConfig {
        ResearchConfig {
            output_dir: output_dir.to_path_buf(),
            ..ResearchConfig::default()
        }
    }

    fn context(query: &str) -> TaskContext {
        let request = Request::new(query).with_mode(modes::DEEP_RESEARCH);
        let decision = ComplexityRouter::default().route(&request);
        let events = RequestEvents::new(request.trace_id);
        events.start(modes::DEEP_RESEARCH, CognitiveTier::Agentic);
        TaskContext::new(request, decision, events)
    }

    fn prompts_starting_with(provider: &ScriptedProvider, marker: &str) -> usize {
        provider
            .prompts()
            .iter()
            .filter(|p| p.starts_with(marker))
            .count()
    }

    fn progress_messages(ctx: &TaskContext) -> Vec<String> {
        ctx.events
            .snapshot()
            .into_iter()
            .filter_map(|event| match event {
                LifecycleEvent::Progress { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_full_run_persists_report_bundle() {
        let temp = tempfile::tempdir().unwrap();
        let provider = researcher(Script {
            sufficient: true,
            charts: CHART_PLAN,
        });
        let search = Arc::new(ScriptedSearch::per_query(2));
        let sandbox = Arc::new(ScriptedSandbox::rendering());
        let workflow = DeepResearchWorkflow::new(
            client(&[provider.clone()]),
            search.clone(),
            settings(temp.path()),
        )
        .with_sandbox(sandbox.clone());

        let mut ctx = context("How did solar do in 2024?");
        let output = workflow.run(&mut ctx).await.unwrap();

        assert!(output.text.contains("![Capacity](artifacts/chart_01.png)"));
        assert!(!output.text.contains("chart://"));
        // Unplaced charts are embedded in their sections
        assert!(output.text.contains("artifacts/chart_03.png"));

        let dir = output.report_dir.unwrap();
        assert!(dir.starts_with(temp.path()));
        assert_eq!(std::fs::read_to_string(dir.join(REPORT_FILE)).unwrap(), output.text);
        for n in 1..=3 {
            assert!(dir.join(format!("artifacts/chart_{:02}.png", n)).exists());
        }

        let metadata: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.join(METADATA_FILE)).unwrap()).unwrap();
        assert_eq!(metadata["iterations"], 1);
        assert_eq!(metadata["queries"].as_array().unwrap().len(), 2);
        assert_eq!(metadata["sources"].as_array().unwrap().len(), 4);
        assert_eq!(metadata["charts"].as_array().unwrap().len(), 3);
        assert_eq!(metadata["coverage"][0]["coverage"], "covered");
        assert_eq!(metadata["sandbox_degraded"], false);

        assert_eq!(search.calls(), 2);
        assert_eq!(sandbox.calls(), 3);
        assert_eq!(
            ctx.workflow.as_ref().and_then(|w| w.current_step()),
            Some(WorkflowStep::Persist)
        );
    }

    #[tokio::test]
    async fn test_degraded_sandbox_is_recorded_in_metadata() {
        let temp = tempfile::tempdir().unwrap();
        let provider = researcher(Script {
            sufficient: true,
            charts: CHART_PLAN,
        });
        let workflow = DeepResearchWorkflow::new(
            client(&[provider]),
            Arc::new(ScriptedSearch::per_query(2)),
            settings(temp.path()),
        )
        .with_sandbox(Arc::new(ScriptedSandbox::degraded()));

        // Runs on a spawned task, as the engine drives it
        let output = tokio::spawn(async move {
            let mut ctx = context("How did solar do in 2024?");
            workflow.run(&mut ctx).await
        })
        .await
        .unwrap()
        .unwrap();

        let dir = output.report_dir.unwrap();
        let metadata: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.join(METADATA_FILE)).unwrap()).unwrap();
        assert_eq!(metadata["sandbox_degraded"], true);
        assert_eq!(metadata["charts"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_research_stops_after_max_iterations() {
        let temp = tempfile::tempdir().unwrap();
        let provider = researcher(Script {
            sufficient: false,
            charts: r#"{"charts": []}"#,
        });
        let search = Arc::new(ScriptedSearch::per_query(1));
        let workflow = DeepResearchWorkflow::new(
            client(&[provider.clone()]),
            search.clone(),
            ResearchConfig {
                max_iterations: 10,
                ..settings(temp.path())
            },
        );

        let mut ctx = context("solar");
        workflow.run(&mut ctx).await.unwrap();

        assert_eq!(prompts_starting_with(&provider, TASK_COMPLETENESS), 3);
        assert_eq!(search.calls(), 6);
        assert_eq!(ctx.workflow.as_ref().map(|w| w.iteration()), Some(3));
    }

    #[tokio::test]
    async fn test_query_budget_caps_research() {
        let temp = tempfile::tempdir().unwrap();
        let provider = researcher(Script {
            sufficient: false,
            charts: r#"{"charts": []}"#,
        });
        let search = Arc::new(ScriptedSearch::per_query(1));
        let workflow = DeepResearchWorkflow::new(
            client(&[provider.clone()]),
            search.clone(),
            ResearchConfig {
                max_total_queries: 3,
                queries_per_iteration: 2,
                ..settings(temp.path())
            },
        );

        let mut ctx = context("solar");
        workflow.run(&mut ctx).await.unwrap();

        assert_eq!(search.calls(), 3);
        assert_eq!(prompts_starting_with(&provider, TASK_COMPLETENESS), 2);
        // The high priority task wins the last slot
        assert!(search.queries().contains(&"solar capacity round 1".to_string()));
    }

    #[tokio::test]
    async fn test_charts_are_skipped_without_sandbox() {
        let temp = tempfile::tempdir().unwrap();
        let provider = researcher(Script {
            sufficient: true,
            charts: CHART_PLAN,
        });
        let workflow = DeepResearchWorkflow::new(
            client(&[provider.clone()]),
            Arc::new(ScriptedSearch::per_query(2)),
            settings(temp.path()),
        );

        let mut ctx = context("solar");
        let output = workflow.run(&mut ctx).await.unwrap();

        assert_eq!(prompts_starting_with(&provider, TASK_CHART_CODE), 0);
        assert!(!output.report_dir.unwrap().join("artifacts/chart_01.png").exists());
        assert!(progress_messages(&ctx)
            .iter()
            .any(|m| m.contains("no code sandbox")));
    }

    #[tokio::test]
    async fn test_unavailable_sandbox_skips_charts() {
        let temp = tempfile::tempdir().unwrap();
        let provider = researcher(Script {
            sufficient: true,
            charts: CHART_PLAN,
        });
        let sandbox = Arc::new(ScriptedSandbox::unavailable());
        let workflow = DeepResearchWorkflow::new(
            client(&[provider.clone()]),
            Arc::new(ScriptedSearch::per_query(2)),
            settings(temp.path()),
        )
        .with_sandbox(sandbox.clone());

        let mut ctx = context("solar");
        assert!(workflow.run(&mut ctx).await.is_ok());
        assert_eq!(sandbox.calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_chart_gets_one_repair() {
        let temp = tempfile::tempdir().unwrap();
        let provider = researcher(Script {
            sufficient: true,
            charts: r#"{"charts": [{"title": "Capacity", "section": "Market"}]}"#,
        });
        let sandbox = Arc::new(
            ScriptedSandbox::rendering().then_raise("NameError: name 'data' is not defined"),
        );
        let workflow = DeepResearchWorkflow::new(
            client(&[provider.clone()]),
            Arc::new(ScriptedSearch::per_query(2)),
            settings(temp.path()),
        )
        .with_sandbox(sandbox.clone());

        let mut ctx = context("solar");
        let output = workflow.run(&mut ctx).await.unwrap();

        assert_eq!(sandbox.calls(), 2);
        assert!(sandbox.codes()[1].contains("plt.plot"));
        assert!(provider
            .prompts()
            .iter()
            .any(|p| p.starts_with(TASK_CHART_REPAIR) && p.contains("NameError")));
        assert!(output
            .report_dir
            .unwrap()
            .join("artifacts/chart_01.png")
            .exists());
    }

    #[tokio::test]
    async fn test_consecutive_chart_failures_abort_remaining_charts() {
        let temp = tempfile::tempdir().unwrap();
        let provider = researcher(Script {
            sufficient: true,
            charts: CHART_PLAN,
        });
        let sandbox = Arc::new(ScriptedSandbox::raising("ValueError: bad data"));
        let workflow = DeepResearchWorkflow::new(
            client(&[provider.clone()]),
            Arc::new(ScriptedSearch::per_query(2)),
            ResearchConfig {
                chart_failure_threshold: 2,
                ..settings(temp.path())
            },
        )
        .with_sandbox(sandbox.clone());

        let mut ctx = context("solar");
        let output = workflow.run(&mut ctx).await.unwrap();

        // Two charts, each tried and repaired once; the third never runs
        assert_eq!(sandbox.calls(), 4);
        assert_eq!(prompts_starting_with(&provider, TASK_CHART_CODE), 2);
        assert!(!output.text.contains("artifacts/chart_01.png"));
        assert!(output.report_dir.unwrap().join(REPORT_FILE).exists());
    }

    #[tokio::test]
    async fn test_search_outage_fails_the_attempt() {
        let temp = tempfile::tempdir().unwrap();
        let provider = researcher(Script {
            sufficient: true,
            charts: CHART_PLAN,
        });
        let workflow = DeepResearchWorkflow::new(
            client(&[provider.clone()]),
            Arc::new(ScriptedSearch::failing(SearchError::Transport(
                "connection reset".to_string(),
            ))),
            settings(temp.path()),
        );

        let mut ctx = context("solar");
        let err = workflow.run(&mut ctx).await.unwrap_err();

        assert!(matches!(err, StrataError::Search(_)));
        assert_eq!(
            ctx.workflow.as_ref().and_then(|w| w.current_step()),
            Some(WorkflowStep::Research)
        );
        assert_eq!(prompts_starting_with(&provider, TASK_REPORT), 0);
    }

    #[tokio::test]
    async fn test_unparseable_outline_uses_generic_sections() {
        let temp = tempfile::tempdir().unwrap();
        let provider = Arc::new(
            ScriptedProvider::responding("fallback", |prompt| {
                let text = if prompt.starts_with(TASK_COMPLETENESS) {
                    r#"{"sufficient": true}"#
                } else if prompt.starts_with(TASK_CHART_PLAN) {
                    r#"{"charts": []}"#
                } else {
                    "I would rather not answer in JSON."
                };
                Ok(reply(text))
            }),
        );
        let search = Arc::new(ScriptedSearch::per_query(2));
        let workflow = DeepResearchWorkflow::new(
            client(&[provider]),
            search.clone(),
            settings(temp.path()),
        );

        let mut ctx = context("solar");
        let output = workflow.run(&mut ctx).await.unwrap();

        // One derived query per generic section
        assert_eq!(search.calls(), 3);
        assert!(search.queries().iter().all(|q| q.starts_with("solar ")));
        assert_eq!(output.text, "I would rather not answer in JSON.");
    }
}
