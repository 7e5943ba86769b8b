//! Processing modes, cognitive tiers and the mode registry.

use regex::Regex;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Complexity tier. The tier alone decides which runtime executes a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum CognitiveTier {
    Fast,
    Analytical,
    Agentic,
}

/// Runtime family a tier maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    Stateless,
    Stateful,
}

impl CognitiveTier {
    pub const fn runtime(self) -> RuntimeKind {
        match self {
            CognitiveTier::Fast | CognitiveTier::Analytical => RuntimeKind::Stateless,
            CognitiveTier::Agentic => RuntimeKind::Stateful,
        }
    }

    /// Only fast-tier results may be served from the response cache.
    pub const fn is_cacheable(self) -> bool {
        matches!(self, CognitiveTier::Fast)
    }
}

impl std::fmt::Display for CognitiveTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CognitiveTier::Fast => write!(f, "fast"),
            CognitiveTier::Analytical => write!(f, "analytical"),
            CognitiveTier::Agentic => write!(f, "agentic"),
        }
    }
}

/// A named processing strategy.
///
/// The runtime kind is fixed by the tier at construction, so a mode can never
/// disagree with its own tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, TS)]
pub struct ProcessingMode {
    name: String,
    tier: CognitiveTier,
    runtime: RuntimeKind,
    description: String,
}

impl ProcessingMode {
    pub fn new(name: impl Into<String>, tier: CognitiveTier) -> Self {
        Self {
            name: name.into(),
            tier,
            runtime: tier.runtime(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tier(&self) -> CognitiveTier {
        self.tier
    }

    pub fn runtime(&self) -> RuntimeKind {
        self.runtime
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

pub const CHAT: &str = "chat";
pub const KNOWLEDGE_QA: &str = "knowledge_qa";
pub const WRITING: &str = "writing";
pub const DATA_ANALYSIS: &str = "data_analysis";
pub const CODE: &str = "code";
pub const DEEP_RESEARCH: &str = "deep_research";

/// A mode plus the signals the router scores it with
#[derive(Debug, Clone)]
pub struct ModeProfile {
    mode: ProcessingMode,
    keywords: Vec<String>,
    patterns: Vec<Regex>,
}

impl ModeProfile {
    pub fn new(mode: ProcessingMode) -> Self {
        Self {
            mode,
            keywords: Vec::new(),
            patterns: Vec::new(),
        }
    }

    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords.extend(keywords.iter().map(|k| k.to_lowercase()));
        self
    }

    /// Patterns that fail to compile are skipped.
    pub fn with_patterns(mut self, patterns: &[&str]) -> Self {
        for pattern in patterns {
            match Regex::new(pattern) {
                Ok(re) => self.patterns.push(re),
                Err(e) => tracing::warn!(
                    mode = %self.mode.name(),
                    "[MODES] Skipping invalid pattern '{}': {}",
                    pattern,
                    e
                ),
            }
        }
        self
    }

    pub fn mode(&self) -> &ProcessingMode {
        &self.mode
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn patterns(&self) -> &[Regex] {
        &self.patterns
    }
}

/// Ordered set of modes. Registration order is the router's tie-break order.
#[derive(Debug, Clone)]
pub struct ModeRegistry {
    profiles: Vec<ModeProfile>,
    default_mode: String,
}

impl ModeRegistry {
    pub fn new(default_profile: ModeProfile) -> Self {
        Self {
            default_mode: default_profile.mode.name().to_string(),
            profiles: vec![default_profile],
        }
    }

    /// Profiles keep registration order and the default always stays last.
    /// Registering an existing name replaces it in place.
    pub fn register(&mut self, profile: ModeProfile) {
        if let Some(pos) = self
            .profiles
            .iter()
            .position(|p| p.mode.name() == profile.mode.name())
        {
            self.profiles[pos] = profile;
            return;
        }
        let insert_at = self
            .profiles
            .iter()
            .position(|p| p.mode.name() == self.default_mode)
            .unwrap_or(self.profiles.len());
        self.profiles.insert(insert_at, profile);
    }

    /// Built-in modes, most specific first.
    pub fn standard() -> Self {
        let mut registry = Self::new(
            ModeProfile::new(
                ProcessingMode::new(CHAT, CognitiveTier::Fast)
                    .with_description("Short conversational answers"),
            )
            .with_keywords(&[
                "hello", "hi", "hey", "thanks", "thank you", "what is", "who is", "how are you",
            ])
            .with_patterns(&[r"^\s*(what|who|when|where)\s+(is|are|was|were)\b"]),
        );

        for profile in [
            ModeProfile::new(
                ProcessingMode::new(DEEP_RESEARCH, CognitiveTier::Agentic)
                    .with_description("Multi-step web research with charts and a persisted report"),
            )
            .with_keywords(&[
                "deep research",
                "research report",
                "comprehensive report",
                "in-depth analysis",
                "literature review",
                "market research",
                "investigate",
                "thorough research",
            ])
            .with_patterns(&[
                r"\b(write|produce|create|compile)\s+(a\s+|an\s+)?(detailed|comprehensive|full|in-depth)\s+report\b",
                r"\bresearch\b.*\b(trends?|landscape|state of)\b",
            ]),
            ModeProfile::new(
                ProcessingMode::new(DATA_ANALYSIS, CognitiveTier::Analytical)
                    .with_description("Structured analysis of data, trends and comparisons"),
            )
            .with_keywords(&[
                "analyze",
                "analyse",
                "analysis",
                "statistics",
                "dataset",
                "correlation",
                "trend",
                "forecast",
                "chart",
                "plot",
            ])
            .with_patterns(&[r"\b(compare|comparison)\b.*\b(vs\.?|versus|and|with)\b"]),
            ModeProfile::new(
                ProcessingMode::new(CODE, CognitiveTier::Analytical)
                    .with_description("Writing, explaining and debugging code"),
            )
            .with_keywords(&[
                "code",
                "function",
                "bug",
                "debug",
                "implement",
                "compile",
                "python",
                "rust",
                "javascript",
                "refactor",
                "stack trace",
            ])
            .with_patterns(&["```", r"\b(fn|def|class|impl)\s+\w+"]),
            ModeProfile::new(
                ProcessingMode::new(WRITING, CognitiveTier::Analytical)
                    .with_description("Drafting and rewriting prose"),
            )
            .with_keywords(&[
                "write", "draft", "essay", "email", "rewrite", "summarize", "blog post", "outline",
            ]),
            ModeProfile::new(
                ProcessingMode::new(KNOWLEDGE_QA, CognitiveTier::Fast)
                    .with_description("Answers grounded in the knowledge base"),
            )
            .with_keywords(&[
                "according to",
                "our docs",
                "documentation",
                "knowledge base",
                "policy",
                "handbook",
            ])
            .with_patterns(&[r"\bwhat does (the|our) (doc|document|guide|manual)"]),
        ] {
            registry.register(profile);
        }

        registry
    }

    pub fn get(&self, name: &str) -> Option<&ProcessingMode> {
        self.profiles
            .iter()
            .find(|p| p.mode.name().eq_ignore_ascii_case(name.trim()))
            .map(|p| &p.mode)
    }

    pub fn default_mode(&self) -> &ProcessingMode {
        self.get(&self.default_mode)
            .unwrap_or_else(|| &self.profiles[self.profiles.len() - 1].mode)
    }

    /// Profiles in priority order
    pub fn profiles(&self) -> &[ModeProfile] {
        &self.profiles
    }

    pub fn modes(&self) -> impl Iterator<Item = &ProcessingMode> {
        self.profiles.iter().map(|p| &p.mode)
    }
}

impl Default for ModeRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_follows_tier() {
        assert_eq!(CognitiveTier::Fast.runtime(), RuntimeKind::Stateless);
        assert_eq!(CognitiveTier::Analytical.runtime(), RuntimeKind::Stateless);
        assert_eq!(CognitiveTier::Agentic.runtime(), RuntimeKind::Stateful);

        let mode = ProcessingMode::new("custom", CognitiveTier::Agentic);
        assert_eq!(mode.runtime(), RuntimeKind::Stateful);
    }

    #[test]
    fn test_standard_registry_order_and_default() {
        let registry = ModeRegistry::standard();
        let names: Vec<&str> = registry.modes().map(|m| m.name()).collect();
        assert_eq!(
            names,
            vec![DEEP_RESEARCH, DATA_ANALYSIS, CODE, WRITING, KNOWLEDGE_QA, CHAT]
        );
        assert_eq!(registry.default_mode().name(), CHAT);
        assert_eq!(registry.default_mode().tier(), CognitiveTier::Fast);
    }

    #[test]
    fn test_every_builtin_pattern_compiles() {
        let registry = ModeRegistry::standard();
        let deep = registry
            .profiles()
            .iter()
            .find(|p| p.mode().name() == DEEP_RESEARCH)
            .unwrap();
        assert_eq!(deep.patterns().len(), 2);
        let code = registry
            .profiles()
            .iter()
            .find(|p| p.mode().name() == CODE)
            .unwrap();
        assert_eq!(code.patterns().len(), 2);
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = ModeRegistry::standard();
        assert_eq!(registry.get("Deep_Research").unwrap().name(), DEEP_RESEARCH);
        assert!(registry.get("poetry").is_none());
    }
}
