//! Chart planning and sandboxed chart rendering

use std::time::Duration;

use serde::Deserialize;

use super::{
    extract_code, parse_json, prompts,
    types::{ChartSpec, ComputationResult, Outline, Synthesis},
    DeepResearchWorkflow, RunScope,
};
use crate::sandbox::{CodeExecutor, ExecutionOutput, RenderedArtifact};

#[derive(Deserialize)]
#[serde(untagged)]
enum ChartPlanReply {
    Wrapped {
        #[serde(default)]
        charts: Vec<ChartSpec>,
    },
    Bare(Vec<ChartSpec>),
}

/// What chart execution produced
#[derive(Debug, Clone, Default)]
pub struct ChartRun {
    pub results: Vec<ComputationResult>,
    pub failed: usize,
    /// No sandbox was available so nothing ran
    pub skipped: bool,
    /// Remaining charts were dropped after too many failures in a row
    pub aborted: bool,
}

/// Chart specs from the planner's answer, at most `max_charts`
pub fn parse_chart_plan(text: &str, outline: &Outline, max_charts: usize) -> Vec<ChartSpec> {
    let specs = match parse_json::<ChartPlanReply>(text) {
        Some(ChartPlanReply::Wrapped { charts }) | Some(ChartPlanReply::Bare(charts)) => charts,
        None => {
            tracing::warn!("[DEEP_RESEARCH] Chart plan was not valid JSON, planning no charts");
            return Vec::new();
        }
    };

    specs
        .into_iter()
        .filter(|spec| !spec.title.trim().is_empty())
        .map(|mut spec| {
            if let Some(section) = outline.find_section(&spec.section) {
                spec.section = section.title.clone();
            }
            spec.code.clear();
            spec
        })
        .take(max_charts)
        .collect()
}

/// Run chart code and demand a figure back
async fn render(
    sandbox: &dyn CodeExecutor,
    code: &str,
    timeout: Duration,
) -> Result<(ExecutionOutput, RenderedArtifact), String> {
    let output = sandbox.execute(code, timeout).await.map_err(|e| e.to_string())?;
    if let Some(error) = &output.error {
        return Err(error.clone());
    }
    let first = output.images().next().cloned();
    match first {
        Some(image) => Ok((output, image)),
        None => Err("code ran but left no open figure".to_string()),
    }
}

impl DeepResearchWorkflow {
    /// Propose charts. Needs no sandbox and never fails the workflow.
    pub(crate) async fn plan_charts(
        &self,
        scope: &RunScope<'_>,
        outline: &Outline,
        synthesis: &Synthesis,
    ) -> Vec<ChartSpec> {
        let max_charts = self.settings.max_charts;
        if max_charts == 0 {
            return Vec::new();
        }

        let prompt = prompts::chart_plan(scope.query, outline, synthesis, max_charts);
        match self.ask(scope, prompt, true).await {
            Ok(text) => {
                let specs = parse_chart_plan(&text, outline, max_charts);
                tracing::info!(charts = specs.len(), "[DEEP_RESEARCH] Chart plan ready");
                specs
            }
            Err(err) => {
                tracing::warn!("[DEEP_RESEARCH] Chart planning failed, continuing without charts: {}", err);
                Vec::new()
            }
        }
    }

    /// Render planned charts one by one in the sandbox.
    ///
    /// Each chart gets one repair round. After `chart_failure_threshold`
    /// consecutive failures the remaining charts are dropped.
    pub(crate) async fn execute_charts(
        &self,
        scope: &RunScope<'_>,
        specs: Vec<ChartSpec>,
        synthesis: &Synthesis,
    ) -> ChartRun {
        let mut run = ChartRun::default();
        if specs.is_empty() {
            return run;
        }

        let sandbox = match &self.sandbox {
            Some(sandbox) if sandbox.is_available().await => sandbox.clone(),
            _ => {
                tracing::info!("[DEEP_RESEARCH] No sandbox available, skipping chart execution");
                scope
                    .events
                    .progress("charts", "Skipping charts: no code sandbox available");
                run.skipped = true;
                return run;
            }
        };

        let timeout = Duration::from_secs(self.settings.chart_timeout_secs);
        let threshold = self.settings.chart_failure_threshold.max(1);
        let total = specs.len();
        let mut consecutive_failures = 0;

        for (index, spec) in specs.into_iter().enumerate() {
            if consecutive_failures >= threshold {
                tracing::warn!(
                    failures = consecutive_failures,
                    dropped = total - index,
                    "[DEEP_RESEARCH] Too many chart failures in a row, aborting remaining charts"
                );
                run.aborted = true;
                break;
            }

            scope.events.progress(
                "charts",
                format!("Rendering chart {} of {}: {}", index + 1, total, spec.title),
            );
            let title = spec.title.clone();
            match self
                .render_chart(scope, sandbox.as_ref(), spec, synthesis, timeout)
                .await
            {
                Ok(result) => {
                    consecutive_failures = 0;
                    run.results.push(result);
                }
                Err(reason) => {
                    consecutive_failures += 1;
                    run.failed += 1;
                    tracing::warn!(chart = %title, "[DEEP_RESEARCH] Chart failed: {}", reason);
                }
            }
        }

        run
    }

    async fn render_chart(
        &self,
        scope: &RunScope<'_>,
        sandbox: &dyn CodeExecutor,
        mut spec: ChartSpec,
        synthesis: &Synthesis,
        timeout: Duration,
    ) -> Result<ComputationResult, String> {
        let answer = self
            .ask(scope, prompts::chart_code(&spec, synthesis), false)
            .await
            .map_err(|e| format!("code generation failed: {}", e))?;
        spec.code = extract_code(&answer);

        let (output, image, repaired) = match render(sandbox, &spec.code, timeout).await {
            Ok((output, image)) => (output, image, false),
            Err(error) => {
                tracing::info!(chart = %spec.title, "[DEEP_RESEARCH] Chart code failed, attempting repair");
                let answer = self
                    .ask(scope, prompts::chart_repair(&spec, &spec.code, &error), false)
                    .await
                    .map_err(|e| format!("repair failed: {}", e))?;
                spec.code = extract_code(&answer);
                let (output, image) = render(sandbox, &spec.code, timeout).await?;
                (output, image, true)
            }
        };

        Ok(ComputationResult {
            image,
            stdout: output.stdout,
            elapsed_ms: output.elapsed.as_millis() as u64,
            repaired,
            degraded: output.degraded,
            spec,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedSandbox;

    #[test]
    fn test_parse_chart_plan() {
        let outline = Outline::fallback("solar");
        let specs = parse_chart_plan(
            r#"{"charts": [
                {"title": "Capacity by year", "kind": "line", "data_description": "GW 2019-2023", "section": "key findings", "code": "ignored"},
                {"title": "", "section": "Background"},
                {"title": "Cost split", "section": "Elsewhere"},
                {"title": "Third"}
            ]}"#,
            &outline,
            2,
        );
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].section, "Key Findings");
        assert!(specs[0].code.is_empty());
        assert_eq!(specs[1].kind, "bar");
        assert_eq!(specs[1].section, "Elsewhere");

        assert!(parse_chart_plan("no charts, sorry", &outline, 3).is_empty());
        assert!(parse_chart_plan(r#"{"charts": []}"#, &outline, 3).is_empty());
    }

    #[tokio::test]
    async fn test_render_returns_first_figure() {
        let sandbox = ScriptedSandbox::rendering();
        let (output, image) = render(&sandbox, "plot()", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(image.name, "figure_1.png");
        assert_eq!(output.artifacts.len(), 1);
    }

    #[tokio::test]
    async fn test_render_without_figure_fails() {
        let sandbox = ScriptedSandbox::rendering().then_output(ExecutionOutput {
            stdout: "42\n".to_string(),
            ..Default::default()
        });
        let err = render(&sandbox, "print(42)", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.contains("no open figure"));
    }
}
