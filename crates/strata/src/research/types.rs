//! Data carried between research steps

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::{cache::normalize_query, sandbox::RenderedArtifact, search::SearchHit};

/// Named section of the planned report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct Section {
    pub title: String,
    #[serde(default)]
    pub focus: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct Outline {
    pub title: String,
    pub sections: Vec<Section>,
}

impl Outline {
    /// Generic outline used when the planner's answer is unusable
    pub fn fallback(query: &str) -> Self {
        let section = |title: &str, focus: &str| Section {
            title: title.to_string(),
            focus: focus.to_string(),
        };
        Self {
            title: query.trim().to_string(),
            sections: vec![
                section("Background", "Context and definitions"),
                section("Key Findings", "Main facts, figures and developments"),
                section("Implications", "Consequences, open questions and outlook"),
            ],
        }
    }

    /// Outline section whose title matches `name`, ignoring case and spacing
    pub fn find_section(&self, name: &str) -> Option<&Section> {
        let wanted = normalize_query(name);
        self.sections
            .iter()
            .find(|s| normalize_query(&s.title) == wanted)
    }

    pub fn render(&self) -> String {
        let mut out = format!("# {}\n", self.title);
        for section in &self.sections {
            if section.focus.is_empty() {
                out.push_str(&format!("- {}\n", section.title));
            } else {
                out.push_str(&format!("- {}: {}\n", section.title, section.focus));
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

/// One query to run against the search capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct SearchTask {
    pub query: String,
    #[serde(default)]
    pub goal: String,
    /// Outline section the results count towards
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub priority: Priority,
}

/// A search result attributed to the task and section that found it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct Evidence {
    /// 1-based citation number
    pub id: usize,
    pub query: String,
    pub section: Option<String>,
    pub hit: SearchHit,
}

/// Everything found so far, across iterations
#[derive(Debug, Clone, Default)]
pub struct EvidenceLedger {
    items: Vec<Evidence>,
    seen: HashSet<(Option<String>, String)>,
}

impl EvidenceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the hits of one task, skipping URLs already attributed to the
    /// same section. Returns the number of new items.
    pub fn absorb(&mut self, task: &SearchTask, hits: Vec<SearchHit>) -> usize {
        let mut added = 0;
        for hit in hits {
            if hit.url.trim().is_empty() {
                continue;
            }
            if !self.seen.insert((task.section.clone(), hit.url.clone())) {
                continue;
            }
            self.items.push(Evidence {
                id: self.items.len() + 1,
                query: task.query.clone(),
                section: task.section.clone(),
                hit,
            });
            added += 1;
        }
        added
    }

    pub fn items(&self) -> &[Evidence] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Distinct source URLs in discovery order
    pub fn sources(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.items
            .iter()
            .filter(|e| seen.insert(e.hit.url.as_str()))
            .map(|e| e.hit.url.clone())
            .collect()
    }

    /// Distinct URLs attributed to `section`
    pub fn urls_for(&self, section: &str) -> HashSet<&str> {
        let wanted = normalize_query(section);
        self.items
            .iter()
            .filter(|e| {
                e.section
                    .as_deref()
                    .is_some_and(|s| normalize_query(s) == wanted)
            })
            .map(|e| e.hit.url.as_str())
            .collect()
    }

    /// Citation index for prompts, each excerpt cut to `excerpt_chars`
    pub fn render_index(&self, excerpt_chars: usize) -> String {
        self.items
            .iter()
            .map(|e| {
                let excerpt: String = e.hit.content.chars().take(excerpt_chars).collect();
                format!(
                    "[{}] {} ({})\nSection: {}\n{}",
                    e.id,
                    e.hit.title,
                    e.hit.url,
                    e.section.as_deref().unwrap_or("general"),
                    excerpt.trim()
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
pub enum Coverage {
    Covered,
    Partial,
    Missing,
}

impl Coverage {
    pub fn from_source_count(count: usize) -> Self {
        match count {
            0 => Coverage::Missing,
            1 => Coverage::Partial,
            _ => Coverage::Covered,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct SectionCoverage {
    pub section: String,
    pub coverage: Coverage,
    pub sources: usize,
}

/// Coverage of every outline section, derived from the whole ledger
pub fn compute_coverage(outline: &Outline, ledger: &EvidenceLedger) -> Vec<SectionCoverage> {
    outline
        .sections
        .iter()
        .map(|section| {
            let sources = ledger.urls_for(&section.title).len();
            SectionCoverage {
                section: section.title.clone(),
                coverage: Coverage::from_source_count(sources),
                sources,
            }
        })
        .collect()
}

/// Something the research has not answered yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct Gap {
    pub description: String,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub priority: Priority,
}

/// Accumulated research narrative
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Synthesis {
    pub narrative: String,
    pub coverage: Vec<SectionCoverage>,
    pub gaps: Vec<Gap>,
}

impl Synthesis {
    pub fn missing_sections(&self) -> Vec<&str> {
        self.coverage
            .iter()
            .filter(|c| c.coverage == Coverage::Missing)
            .map(|c| c.section.as_str())
            .collect()
    }

    pub fn render_coverage(&self) -> String {
        self.coverage
            .iter()
            .map(|c| {
                let label = match c.coverage {
                    Coverage::Covered => "covered",
                    Coverage::Partial => "partial",
                    Coverage::Missing => "missing",
                };
                format!("- {}: {} ({} sources)", c.section, label, c.sources)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Outcome of the completeness check
#[derive(Debug, Clone, PartialEq)]
pub struct CompletenessReview {
    pub sufficient: bool,
    /// Most important first
    pub gaps: Vec<Gap>,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct ChartSpec {
    pub title: String,
    /// bar, line, pie, scatter, ...
    #[serde(default = "default_chart_kind")]
    pub kind: String,
    #[serde(default)]
    pub data_description: String,
    /// Outline section the chart belongs to
    #[serde(default)]
    pub section: String,
    /// Filled in by chart execution
    #[serde(default)]
    pub code: String,
}

fn default_chart_kind() -> String {
    "bar".to_string()
}

/// A chart that rendered
#[derive(Debug, Clone, PartialEq)]
pub struct ComputationResult {
    pub spec: ChartSpec,
    pub image: RenderedArtifact,
    pub stdout: String,
    pub elapsed_ms: u64,
    /// Rendered only after one repair round
    pub repaired: bool,
    /// Ran in a one-off sandbox process
    pub degraded: bool,
}

/// Chart entry of the persisted manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct ChartManifestEntry {
    pub file: String,
    pub title: String,
    pub section: String,
    pub bytes: usize,
}

/// Contents of `metadata.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct ReportMetadata {
    pub trace_id: Uuid,
    pub query: String,
    pub title: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub iterations: u32,
    pub queries: Vec<String>,
    pub sources: Vec<String>,
    pub coverage: Vec<SectionCoverage>,
    pub charts: Vec<ChartManifestEntry>,
    pub sandbox_degraded: bool,
}

/// The durable research output
#[derive(Debug, Clone)]
pub struct ReportBundle {
    pub report: String,
    pub metadata: ReportMetadata,
    /// File name under `artifacts/` and bytes
    pub artifacts: BTreeMap<String, Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(url: &str) -> SearchHit {
        SearchHit {
            url: url.to_string(),
            title: format!("Title of {}", url),
            content: "Some content".to_string(),
            published_date: None,
        }
    }

    fn task(query: &str, section: Option<&str>) -> SearchTask {
        SearchTask {
            query: query.to_string(),
            goal: String::new(),
            section: section.map(String::from),
            priority: Priority::Medium,
        }
    }

    #[test]
    fn test_ledger_dedupes_per_section() {
        let mut ledger = EvidenceLedger::new();
        let background = task("history of x", Some("Background"));
        assert_eq!(ledger.absorb(&background, vec![hit("https://a"), hit("https://a")]), 1);
        assert_eq!(ledger.absorb(&background, vec![hit("https://a"), hit("")]), 0);

        // Same URL supporting another section is new evidence for that section
        let findings = task("x numbers", Some("Key Findings"));
        assert_eq!(ledger.absorb(&findings, vec![hit("https://a")]), 1);

        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.sources(), vec!["https://a".to_string()]);
        assert_eq!(ledger.items()[1].id, 2);
    }

    #[test]
    fn test_coverage_counts_distinct_urls() {
        let outline = Outline::fallback("topic");
        let mut ledger = EvidenceLedger::new();
        ledger.absorb(
            &task("q1", Some("background")),
            vec![hit("https://a"), hit("https://b")],
        );
        ledger.absorb(&task("q2", Some("Key  Findings")), vec![hit("https://c")]);

        let coverage = compute_coverage(&outline, &ledger);
        assert_eq!(coverage[0].coverage, Coverage::Covered);
        assert_eq!(coverage[1].coverage, Coverage::Partial);
        assert_eq!(coverage[2].coverage, Coverage::Missing);

        let synthesis = Synthesis {
            coverage,
            ..Default::default()
        };
        assert_eq!(synthesis.missing_sections(), vec!["Implications"]);
    }

    #[test]
    fn test_priority_orders_high_first() {
        let mut priorities = vec![Priority::Low, Priority::High, Priority::Medium];
        priorities.sort();
        assert_eq!(priorities, vec![Priority::High, Priority::Medium, Priority::Low]);
    }
}
