//! Report assembly and persistence

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{
    prompts,
    types::{ChartManifestEntry, ChartSpec, ComputationResult, Outline, ReportBundle, ReportMetadata},
    DeepResearchWorkflow, ResearchOutcome, RunScope,
};
use crate::{cache::normalize_query, error::Result};

const EXCERPT_CHARS: usize = 400;

pub const REPORT_FILE: &str = "report.md";
pub const METADATA_FILE: &str = "metadata.json";
pub const ARTIFACTS_DIR: &str = "artifacts";

pub fn chart_file_name(number: usize) -> String {
    format!("chart_{:02}.png", number)
}

/// `{first 8 chars of trace id}_{YYYYmmdd_HHMMSS}`
pub fn run_dir_name(trace_id: Uuid, at: DateTime<Utc>) -> String {
    let id = trace_id.simple().to_string();
    format!("{}_{}", &id[..8], at.format("%Y%m%d_%H%M%S"))
}

/// Put chart images into the report.
///
/// `chart://N` placeholders written by the model become relative artifact
/// paths. Charts the model did not place go at the end of their target
/// section, or at the end of the report if that section is absent.
pub fn embed_charts(report: &str, charts: &[ComputationResult]) -> String {
    let mut report = report.to_string();
    for (index, chart) in charts.iter().enumerate() {
        let number = index + 1;
        let path = format!("{}/{}", ARTIFACTS_DIR, chart_file_name(number));
        let placeholder = format!("(chart://{})", number);
        if report.contains(&placeholder) {
            report = report.replace(&placeholder, &format!("({})", path));
        } else {
            let image = format!("![{}]({})", chart.spec.title, path);
            report = insert_into_section(&report, &chart.spec.section, &image);
        }
    }
    report
}

fn heading_level(line: &str) -> Option<usize> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    (level > 0 && trimmed[level..].starts_with(' ')).then_some(level)
}

fn insert_into_section(report: &str, section: &str, block: &str) -> String {
    let mut lines: Vec<&str> = report.lines().collect();
    let wanted = normalize_query(section);

    let heading = (!wanted.is_empty())
        .then(|| {
            lines.iter().enumerate().find_map(|(i, line)| {
                let level = heading_level(line)?;
                let text = normalize_query(line.trim_start().trim_start_matches('#'));
                text.contains(&wanted).then_some((i, level))
            })
        })
        .flatten();

    let Some((start, level)) = heading else {
        return format!("{}\n\n{}\n", report.trim_end(), block);
    };

    let mut end = lines[start + 1..]
        .iter()
        .position(|line| heading_level(line).is_some_and(|l| l <= level))
        .map(|offset| start + 1 + offset)
        .unwrap_or(lines.len());
    while end > start + 1 && lines[end - 1].trim().is_empty() {
        end -= 1;
    }

    lines.splice(end..end, ["", block, ""]);
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

pub struct BundleInfo<'a> {
    pub trace_id: Uuid,
    pub query: &'a str,
    pub outline: &'a Outline,
    pub research: &'a ResearchOutcome,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

pub fn build_bundle(report: String, info: BundleInfo<'_>, charts: &[ComputationResult]) -> ReportBundle {
    let mut artifacts = BTreeMap::new();
    let mut manifest = Vec::new();
    for (index, chart) in charts.iter().enumerate() {
        let file = chart_file_name(index + 1);
        manifest.push(ChartManifestEntry {
            file: format!("{}/{}", ARTIFACTS_DIR, file),
            title: chart.spec.title.clone(),
            section: chart.spec.section.clone(),
            bytes: chart.image.data.len(),
        });
        artifacts.insert(file, chart.image.data.clone());
    }

    ReportBundle {
        report,
        metadata: ReportMetadata {
            trace_id: info.trace_id,
            query: info.query.to_string(),
            title: info.outline.title.clone(),
            started_at: info.started_at,
            duration_ms: info.duration.as_millis() as u64,
            iterations: info.research.iterations,
            queries: info.research.queries.clone(),
            sources: info.research.ledger.sources(),
            coverage: info.research.synthesis.coverage.clone(),
            charts: manifest,
            sandbox_degraded: charts.iter().any(|c| c.degraded),
        },
        artifacts,
    }
}

async fn write_bundle(dir: &Path, bundle: &ReportBundle) -> std::io::Result<()> {
    let artifacts = dir.join(ARTIFACTS_DIR);
    tokio::fs::create_dir_all(&artifacts).await?;
    for (name, bytes) in &bundle.artifacts {
        tokio::fs::write(artifacts.join(name), bytes).await?;
    }
    let metadata = serde_json::to_vec_pretty(&bundle.metadata)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    tokio::fs::write(dir.join(METADATA_FILE), metadata).await?;
    tokio::fs::write(dir.join(REPORT_FILE), &bundle.report).await
}

/// Write the bundle into `dir`. If that fails, write the report text alone
/// so the result is not lost. Returns the directory holding the report.
pub async fn persist_bundle(dir: &Path, bundle: &ReportBundle) -> Option<PathBuf> {
    match write_bundle(dir, bundle).await {
        Ok(()) => {
            tracing::info!(
                dir = %dir.display(),
                artifacts = bundle.artifacts.len(),
                "[DEEP_RESEARCH] Report bundle saved"
            );
            Some(dir.to_path_buf())
        }
        Err(err) => {
            tracing::warn!(
                dir = %dir.display(),
                "[DEEP_RESEARCH] Failed to save report bundle, saving report only: {}",
                err
            );
            let fallback = async {
                tokio::fs::create_dir_all(dir).await?;
                tokio::fs::write(dir.join(REPORT_FILE), &bundle.report).await
            };
            match fallback.await {
                Ok(()) => Some(dir.to_path_buf()),
                Err(err) => {
                    tracing::error!(
                        dir = %dir.display(),
                        "[DEEP_RESEARCH] Failed to save report: {}",
                        err
                    );
                    None
                }
            }
        }
    }
}

impl DeepResearchWorkflow {
    pub(crate) async fn write_report(
        &self,
        scope: &RunScope<'_>,
        outline: &Outline,
        research: &ResearchOutcome,
        charts: &[ComputationResult],
    ) -> Result<String> {
        let placed: Vec<(usize, &ChartSpec)> = charts
            .iter()
            .enumerate()
            .map(|(i, c)| (i + 1, &c.spec))
            .collect();
        let prompt = prompts::report(
            scope.query,
            outline,
            &research.synthesis,
            &research.ledger.render_index(EXCERPT_CHARS),
            &placed,
        );
        let text = self.ask(scope, prompt, false).await?;
        Ok(embed_charts(text.trim(), charts))
    }
}
