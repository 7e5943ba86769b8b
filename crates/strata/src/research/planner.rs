//! Outline and search-task planning

use std::collections::HashSet;

use serde::Deserialize;

use super::{
    parse_json, prompts,
    types::{Gap, Outline, SearchTask, Section},
    DeepResearchWorkflow, RunScope,
};
use crate::{cache::normalize_query, error::Result};

#[derive(Deserialize)]
struct OutlineReply {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    sections: Vec<Section>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TasksReply {
    Wrapped { tasks: Vec<SearchTask> },
    Bare(Vec<SearchTask>),
}

/// Outline from the planner's answer, or a generic one if unusable
pub fn parse_outline(text: &str, query: &str) -> Outline {
    let Some(reply) = parse_json::<OutlineReply>(text) else {
        tracing::warn!("[DEEP_RESEARCH] Outline answer was not valid JSON, using generic outline");
        return Outline::fallback(query);
    };

    let mut seen = HashSet::new();
    let sections: Vec<Section> = reply
        .sections
        .into_iter()
        .filter(|s| !s.title.trim().is_empty())
        .filter(|s| seen.insert(normalize_query(&s.title)))
        .collect();
    if sections.is_empty() {
        return Outline::fallback(query);
    }

    Outline {
        title: reply
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| query.trim().to_string()),
        sections,
    }
}

pub fn parse_search_tasks(text: &str) -> Vec<SearchTask> {
    match parse_json::<TasksReply>(text) {
        Some(TasksReply::Wrapped { tasks }) | Some(TasksReply::Bare(tasks)) => tasks,
        None => Vec::new(),
    }
}

/// Tasks derived without the model: one per section on a first pass, one
/// per gap afterwards
pub fn fallback_tasks(query: &str, outline: &Outline, gaps: &[Gap]) -> Vec<SearchTask> {
    if gaps.is_empty() {
        outline
            .sections
            .iter()
            .map(|section| SearchTask {
                query: format!("{} {}", query.trim(), section.title),
                goal: section.focus.clone(),
                section: Some(section.title.clone()),
                priority: Default::default(),
            })
            .collect()
    } else {
        gaps.iter()
            .map(|gap| SearchTask {
                query: format!("{} {}", query.trim(), gap.description),
                goal: gap.description.clone(),
                section: gap.section.clone(),
                priority: gap.priority,
            })
            .collect()
    }
}

/// Drop queries already issued (compared normalized) and keep at most
/// `limit`, highest priority first. Kept queries are added to `issued`.
pub fn dedupe_tasks(
    mut tasks: Vec<SearchTask>,
    issued: &mut HashSet<String>,
    limit: usize,
) -> Vec<SearchTask> {
    tasks.sort_by_key(|t| t.priority);
    let mut kept = Vec::new();
    for task in tasks {
        if kept.len() >= limit {
            break;
        }
        let key = normalize_query(&task.query);
        if key.is_empty() || !issued.insert(key) {
            continue;
        }
        kept.push(task);
    }
    kept
}

/// Point each task's section at the outline's spelling of it
fn align_sections(outline: &Outline, tasks: &mut [SearchTask]) {
    for task in tasks {
        task.section = task
            .section
            .as_deref()
            .and_then(|name| outline.find_section(name))
            .map(|s| s.title.clone());
    }
}

impl DeepResearchWorkflow {
    pub(crate) async fn plan_outline(&self, scope: &RunScope<'_>) -> Result<Outline> {
        let text = self.ask(scope, prompts::outline(scope.query), true).await?;
        Ok(parse_outline(&text, scope.query))
    }

    /// Next batch of new queries. Broad over the outline when there are no
    /// gaps yet, aimed at the gaps otherwise.
    pub(crate) async fn plan_search_tasks(
        &self,
        scope: &RunScope<'_>,
        outline: &Outline,
        gaps: &[Gap],
        issued_queries: &[String],
        issued: &mut HashSet<String>,
        limit: usize,
    ) -> Result<Vec<SearchTask>> {
        let prompt = prompts::search_tasks(scope.query, outline, gaps, issued_queries, limit);
        let text = self.ask(scope, prompt, true).await?;

        let mut planned = parse_search_tasks(&text);
        align_sections(outline, &mut planned);
        let tasks = dedupe_tasks(planned, issued, limit);
        if !tasks.is_empty() {
            return Ok(tasks);
        }

        tracing::debug!("[DEEP_RESEARCH] Planner gave no new queries, deriving them locally");
        let mut derived = fallback_tasks(scope.query, outline, gaps);
        align_sections(outline, &mut derived);
        Ok(dedupe_tasks(derived, issued, limit))
    }
}
