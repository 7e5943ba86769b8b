//! Progressive synthesis and the completeness review

use serde::Deserialize;

use super::{
    parse_json, prompts,
    types::{compute_coverage, CompletenessReview, Coverage, EvidenceLedger, Gap, Outline, Priority, Synthesis},
    DeepResearchWorkflow, RunScope,
};
use crate::{cache::normalize_query, error::Result};

const EXCERPT_CHARS: usize = 800;

#[derive(Debug, Default, Deserialize)]
struct ReviewReply {
    #[serde(default)]
    sufficient: bool,
    #[serde(default)]
    gaps: Vec<Gap>,
    #[serde(default)]
    rationale: String,
}

/// Combine the model's verdict with measured coverage.
///
/// Research is sufficient only when the model says so and no section is
/// missing evidence. Sections without full coverage become gaps when the
/// model did not already name them; gaps are ranked by priority, keeping the
/// model's order within a priority.
pub fn assess(answer: &str, synthesis: &Synthesis) -> CompletenessReview {
    let reply = parse_json::<ReviewReply>(answer).unwrap_or_else(|| {
        tracing::warn!("[DEEP_RESEARCH] Completeness answer was not valid JSON, treating as insufficient");
        ReviewReply::default()
    });

    let mut gaps: Vec<Gap> = reply
        .gaps
        .into_iter()
        .filter(|g| !g.description.trim().is_empty())
        .collect();

    for coverage in &synthesis.coverage {
        let priority = match coverage.coverage {
            Coverage::Covered => continue,
            Coverage::Partial => Priority::Medium,
            Coverage::Missing => Priority::High,
        };
        let wanted = normalize_query(&coverage.section);
        let named = gaps.iter().any(|g| {
            g.section
                .as_deref()
                .is_some_and(|s| normalize_query(s) == wanted)
        });
        if !named {
            gaps.push(Gap {
                description: format!("More sources on {}", coverage.section),
                section: Some(coverage.section.clone()),
                priority,
            });
        }
    }
    gaps.sort_by_key(|g| g.priority);

    let sufficient = reply.sufficient && synthesis.missing_sections().is_empty();
    CompletenessReview {
        sufficient,
        gaps,
        rationale: reply.rationale,
    }
}

impl DeepResearchWorkflow {
    /// Rewrite the narrative from all evidence so far and recompute coverage
    pub(crate) async fn synthesize(
        &self,
        scope: &RunScope<'_>,
        outline: &Outline,
        ledger: &EvidenceLedger,
        previous: &Synthesis,
    ) -> Result<Synthesis> {
        let prompt = prompts::synthesis(
            scope.query,
            outline,
            &previous.narrative,
            &ledger.render_index(EXCERPT_CHARS),
        );
        let narrative = self.ask(scope, prompt, false).await?;

        Ok(Synthesis {
            narrative: narrative.trim().to_string(),
            coverage: compute_coverage(outline, ledger),
            gaps: previous.gaps.clone(),
        })
    }

    pub(crate) async fn review_completeness(
        &self,
        scope: &RunScope<'_>,
        outline: &Outline,
        synthesis: &Synthesis,
    ) -> Result<CompletenessReview> {
        let answer = self
            .ask(scope, prompts::completeness(scope.query, outline, synthesis), true)
            .await?;
        let review = assess(&answer, synthesis);
        tracing::info!(
            sufficient = review.sufficient,
            gaps = review.gaps.len(),
            "[DEEP_RESEARCH] Completeness review: {}",
            review.rationale
        );
        Ok(review)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::types::SectionCoverage;

    fn synthesis(coverage: &[(&str, Coverage)]) -> Synthesis {
        Synthesis {
            narrative: "text".to_string(),
            coverage: coverage
                .iter()
                .map(|(section, coverage)| SectionCoverage {
                    section: section.to_string(),
                    coverage: *coverage,
                    sources: 0,
                })
                .collect(),
            gaps: Vec::new(),
        }
    }

    #[test]
    fn test_missing_section_overrides_model_verdict() {
        let synthesis = synthesis(&[("Market", Coverage::Covered), ("Policy", Coverage::Missing)]);
        let review = assess(r#"{"sufficient": true, "gaps": []}"#, &synthesis);
        assert!(!review.sufficient);
        assert_eq!(review.gaps.len(), 1);
        assert_eq!(review.gaps[0].section.as_deref(), Some("Policy"));
        assert_eq!(review.gaps[0].priority, Priority::High);
    }

    #[test]
    fn test_sufficient_with_partial_coverage() {
        let synthesis = synthesis(&[("Market", Coverage::Covered), ("Policy", Coverage::Partial)]);
        let review = assess(
            r#"{"sufficient": true, "gaps": [{"description": "2025 outlook", "section": "policy", "priority": "low"}], "rationale": "good enough"}"#,
            &synthesis,
        );
        assert!(review.sufficient);
        // The model already named the partial section
        assert_eq!(review.gaps.len(), 1);
        assert_eq!(review.rationale, "good enough");
    }

    #[test]
    fn test_gaps_are_ranked_by_priority() {
        let synthesis = synthesis(&[("Market", Coverage::Missing)]);
        let review = assess(
            r#"{"sufficient": false, "gaps": [
                {"description": "minor detail", "priority": "low"},
                {"description": "prices", "priority": "medium"}
            ]}"#,
            &synthesis,
        );
        let order: Vec<_> = review.gaps.iter().map(|g| g.description.as_str()).collect();
        assert_eq!(order, vec!["More sources on Market", "prices", "minor detail"]);
    }

    #[test]
    fn test_unparseable_answer_is_insufficient() {
        let synthesis = synthesis(&[("Market", Coverage::Covered)]);
        let review = assess("Looks complete to me!", &synthesis);
        assert!(!review.sufficient);
        assert!(review.gaps.is_empty());
    }
}
