//! Complexity router
//!
//! Chooses a processing mode for each request. An explicit, known mode wins
//! outright. Otherwise every registered mode is scored against the query and
//! the highest score wins, with ties going to the earlier mode in registry
//! order. A secondary complexity score only annotates the decision.

use serde::Serialize;
use ts_rs::TS;

use crate::{
    modes::{ModeRegistry, ProcessingMode},
    request::{ModeSelection, Request},
};

const KEYWORD_WEIGHT: f32 = 1.0;
const PATTERN_WEIGHT: f32 = 2.0;
const NO_MATCH_CONFIDENCE: f32 = 0.3;

/// Capability the chosen handler will probably need
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum ToolHint {
    WebSearch,
    CodeExecution,
    KnowledgeBase,
    Charting,
}

/// Query features the complexity score is built from
#[derive(Debug, Clone, Default, PartialEq, Serialize, TS)]
pub struct ComplexitySignals {
    pub length_chars: usize,
    pub question_count: usize,
    pub multi_step_markers: usize,
    pub tool_keywords: usize,
}

/// Annotation only; never changes which mode is chosen
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
pub struct ComplexityScore {
    /// 0.0 (trivial) to 1.0 (clearly multi-step)
    pub score: f32,
    pub signals: ComplexitySignals,
}

/// Router output. Read-only once produced.
#[derive(Debug, Clone, Serialize, TS)]
pub struct RoutingDecision {
    mode: ProcessingMode,
    confidence: f32,
    complexity: Option<ComplexityScore>,
    tool_hints: Vec<ToolHint>,
    reasons: Vec<String>,
}

impl RoutingDecision {
    pub fn mode(&self) -> &ProcessingMode {
        &self.mode
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn complexity(&self) -> Option<&ComplexityScore> {
        self.complexity.as_ref()
    }

    pub fn tool_hints(&self) -> &[ToolHint] {
        &self.tool_hints
    }

    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }
}

/// Routes requests to processing modes
#[derive(Debug, Clone)]
pub struct ComplexityRouter {
    registry: ModeRegistry,
}

impl ComplexityRouter {
    pub fn new(registry: ModeRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ModeRegistry {
        &self.registry
    }

    /// Route a request. Never fails; unknown modes fall back to scoring.
    pub fn route(&self, request: &Request) -> RoutingDecision {
        self.route_query(&request.query, &request.mode)
    }

    pub fn route_query(&self, query: &str, selection: &ModeSelection) -> RoutingDecision {
        if let ModeSelection::Explicit(name) = selection {
            match self.registry.get(name) {
                Some(mode) => {
                    tracing::debug!(mode = %mode.name(), "[ROUTER] Explicit mode selected");
                    return self.decide(
                        mode.clone(),
                        1.0,
                        query,
                        vec![format!("Explicit mode '{}' requested", mode.name())],
                    );
                }
                None => tracing::warn!(
                    requested = %name,
                    "[ROUTER] Unknown mode requested, falling back to automatic routing"
                ),
            }
        }

        let matchable = matchable_text(query);
        let lowered = query.to_lowercase();

        let mut best: Option<(usize, f32, Vec<String>)> = None;
        let mut runner_up = 0.0f32;

        for (index, profile) in self.registry.profiles().iter().enumerate() {
            let mut score = 0.0f32;
            let mut reasons = Vec::new();

            for keyword in profile.keywords() {
                if contains_phrase(&matchable, keyword) {
                    score += KEYWORD_WEIGHT;
                    reasons.push(format!("Keyword '{}' matched", keyword));
                }
            }
            for pattern in profile.patterns() {
                if pattern.is_match(&lowered) {
                    score += PATTERN_WEIGHT;
                    reasons.push(format!("Pattern '{}' matched", pattern.as_str()));
                }
            }

            match &best {
                // Strictly greater: earlier modes keep ties
                Some((_, best_score, _)) if score <= *best_score => {
                    runner_up = runner_up.max(score);
                }
                _ => {
                    if let Some((_, previous, _)) = &best {
                        runner_up = runner_up.max(*previous);
                    }
                    best = Some((index, score, reasons));
                }
            }
        }

        match best {
            Some((index, score, reasons)) if score > 0.0 => {
                let mode = self.registry.profiles()[index].mode().clone();
                let confidence = (0.5 + 0.5 * (score - runner_up) / score).clamp(0.0, 1.0);
                tracing::debug!(
                    mode = %mode.name(),
                    score,
                    confidence,
                    "[ROUTER] Routed by signal score"
                );
                self.decide(mode, confidence, query, reasons)
            }
            _ => {
                let mode = self.registry.default_mode().clone();
                tracing::debug!(mode = %mode.name(), "[ROUTER] No signals matched, using default mode");
                self.decide(
                    mode,
                    NO_MATCH_CONFIDENCE,
                    query,
                    vec!["No mode signals matched; default mode".to_string()],
                )
            }
        }
    }

    fn decide(
        &self,
        mode: ProcessingMode,
        confidence: f32,
        query: &str,
        reasons: Vec<String>,
    ) -> RoutingDecision {
        let matchable = matchable_text(query);
        RoutingDecision {
            mode,
            confidence,
            complexity: Some(score_complexity(query, &matchable)),
            tool_hints: tool_hints(&matchable),
            reasons,
        }
    }
}

impl Default for ComplexityRouter {
    fn default() -> Self {
        Self::new(ModeRegistry::standard())
    }
}

const MULTI_STEP_MARKERS: &[&str] = &[
    "then",
    "after that",
    "first",
    "second",
    "finally",
    "step by step",
    "and also",
    "compare",
    "for each",
];

const TOOL_KEYWORDS: &[(&str, ToolHint)] = &[
    ("search", ToolHint::WebSearch),
    ("latest", ToolHint::WebSearch),
    ("news", ToolHint::WebSearch),
    ("sources", ToolHint::WebSearch),
    ("research", ToolHint::WebSearch),
    ("run", ToolHint::CodeExecution),
    ("execute", ToolHint::CodeExecution),
    ("python", ToolHint::CodeExecution),
    ("calculate", ToolHint::CodeExecution),
    ("docs", ToolHint::KnowledgeBase),
    ("documentation", ToolHint::KnowledgeBase),
    ("knowledge base", ToolHint::KnowledgeBase),
    ("chart", ToolHint::Charting),
    ("plot", ToolHint::Charting),
    ("graph", ToolHint::Charting),
    ("visualize", ToolHint::Charting),
];

fn score_complexity(query: &str, matchable: &str) -> ComplexityScore {
    let signals = ComplexitySignals {
        length_chars: query.chars().count(),
        question_count: query.matches('?').count(),
        multi_step_markers: MULTI_STEP_MARKERS
            .iter()
            .filter(|marker| contains_phrase(matchable, marker))
            .count(),
        tool_keywords: TOOL_KEYWORDS
            .iter()
            .filter(|(keyword, _)| contains_phrase(matchable, keyword))
            .count(),
    };

    let length = (signals.length_chars as f32 / 400.0).min(1.0);
    let questions = (signals.question_count.saturating_sub(1) as f32 / 3.0).min(1.0);
    let steps = (signals.multi_step_markers as f32 / 3.0).min(1.0);
    let tools = (signals.tool_keywords as f32 / 3.0).min(1.0);
    let score = (0.3 * length + 0.2 * questions + 0.3 * steps + 0.2 * tools).clamp(0.0, 1.0);

    ComplexityScore { score, signals }
}

fn tool_hints(matchable: &str) -> Vec<ToolHint> {
    let mut hints = Vec::new();
    for (keyword, hint) in TOOL_KEYWORDS {
        if contains_phrase(matchable, keyword) && !hints.contains(hint) {
            hints.push(*hint);
        }
    }
    hints
}

/// Lowercased words separated by single spaces, padded at both ends
fn matchable_text(query: &str) -> String {
    let words = query
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '+' { c } else { ' ' })
        .collect::<String>();
    format!(" {} ", words.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn contains_phrase(matchable: &str, phrase: &str) -> bool {
    matchable.contains(&format!(" {} ", phrase))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modes::{CognitiveTier, CHAT, CODE, DATA_ANALYSIS, DEEP_RESEARCH, KNOWLEDGE_QA};

    fn route(query: &str) -> RoutingDecision {
        ComplexityRouter::default().route(&Request::new(query))
    }

    #[test]
    fn test_simple_question_routes_to_chat() {
        let decision = route("What is 2+2?");
        assert_eq!(decision.mode().name(), CHAT);
        assert_eq!(decision.mode().tier(), CognitiveTier::Fast);
    }

    #[test]
    fn test_research_request_routes_to_agentic_mode() {
        let decision =
            route("Write a comprehensive report on the research landscape of solid-state batteries");
        assert_eq!(decision.mode().name(), DEEP_RESEARCH);
        assert_eq!(decision.mode().tier(), CognitiveTier::Agentic);
        assert!(decision.tool_hints().contains(&ToolHint::WebSearch));
    }

    #[test]
    fn test_code_request() {
        let decision = route("Can you debug this python function for me?");
        assert_eq!(decision.mode().name(), CODE);
        assert!(decision.tool_hints().contains(&ToolHint::CodeExecution));
    }

    #[test]
    fn test_knowledge_request() {
        let decision = route("According to the handbook, how many vacation days do I get?");
        assert_eq!(decision.mode().name(), KNOWLEDGE_QA);
    }

    #[test]
    fn test_no_signal_uses_default() {
        let decision = route("zzz qqq");
        assert_eq!(decision.mode().name(), CHAT);
        assert_eq!(decision.confidence(), NO_MATCH_CONFIDENCE);
    }

    #[test]
    fn test_ties_go_to_earlier_mode() {
        // "trend" (data_analysis) and "code" (code) each score one keyword
        let decision = route("trend code");
        assert_eq!(decision.mode().name(), DATA_ANALYSIS);
    }

    #[test]
    fn test_keywords_match_whole_words_only() {
        // "this" must not trigger the "hi" greeting keyword
        let decision = route("this thing");
        assert_eq!(decision.confidence(), NO_MATCH_CONFIDENCE);
    }

    #[test]
    fn test_explicit_mode_wins() {
        let router = ComplexityRouter::default();
        let decision = router.route(&Request::new("What is 2+2?").with_mode("deep_research"));
        assert_eq!(decision.mode().name(), DEEP_RESEARCH);
        assert_eq!(decision.confidence(), 1.0);
    }

    #[test]
    fn test_unknown_explicit_mode_falls_back_to_scoring() {
        let router = ComplexityRouter::default();
        let decision = router.route(&Request::new("What is 2+2?").with_mode("haiku"));
        assert_eq!(decision.mode().name(), CHAT);
    }

    #[test]
    fn test_routing_is_deterministic() {
        let router = ComplexityRouter::default();
        let query = "Compare revenue trends for Apple and Microsoft then plot them";
        let first = router.route(&Request::new(query));
        for _ in 0..20 {
            let again = router.route(&Request::new(query));
            assert_eq!(again.mode(), first.mode());
            assert_eq!(again.confidence(), first.confidence());
            assert_eq!(again.complexity(), first.complexity());
        }
    }

    #[test]
    fn test_complexity_grows_with_multi_step_queries() {
        let simple = route("hello");
        let involved = route(
            "First search for the latest GDP figures, then compare them for each G7 country, \
             and finally plot the results. What changed? Why?",
        );
        let simple_score = simple.complexity().unwrap().score;
        let involved_score = involved.complexity().unwrap().score;
        assert!(involved_score > simple_score);
        assert!(involved.complexity().unwrap().signals.multi_step_markers >= 3);
    }
}
