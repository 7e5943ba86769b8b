//! Knowledge base used by the knowledge_qa mode

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{cache::normalize_query, error::Result};

/// A retrieved piece of reference text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub source: String,
    pub text: String,
    pub score: f32,
}

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Best matching passages, highest score first
    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<Passage>>;
}

/// In-memory store ranked by term overlap
#[derive(Default)]
pub struct InMemoryKnowledgeBase {
    documents: RwLock<Vec<(String, String)>>,
}

impl InMemoryKnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_document(&self, source: impl Into<String>, text: impl Into<String>) {
        self.documents
            .write()
            .await
            .push((source.into(), text.into()));
    }

    /// Load every `.md` and `.txt` file under `dir` (not recursive)
    pub async fn load_dir(&self, dir: &std::path::Path) -> Result<usize> {
        let mut loaded = 0;
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_text = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("md") | Some("txt")
            );
            if !is_text {
                continue;
            }
            let text = tokio::fs::read_to_string(&path).await?;
            self.add_document(path.display().to_string(), text).await;
            loaded += 1;
        }
        tracing::info!("[KNOWLEDGE] Loaded {} documents from {}", loaded, dir.display());
        Ok(loaded)
    }
}

fn terms(text: &str) -> Vec<String> {
    normalize_query(text)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(String::from)
        .collect()
}

#[async_trait]
impl KnowledgeBase for InMemoryKnowledgeBase {
    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<Passage>> {
        let query_terms = terms(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let documents = self.documents.read().await;
        let mut passages = Vec::new();
        for (source, text) in documents.iter() {
            for paragraph in text.split("\n\n").filter(|p| !p.trim().is_empty()) {
                let paragraph_terms = terms(paragraph);
                let overlap = query_terms
                    .iter()
                    .filter(|t| paragraph_terms.contains(t))
                    .count();
                if overlap > 0 {
                    passages.push(Passage {
                        source: source.clone(),
                        text: paragraph.trim().to_string(),
                        score: overlap as f32 / query_terms.len() as f32,
                    });
                }
            }
        }

        passages.sort_by(|a, b| b.score.total_cmp(&a.score));
        passages.truncate(limit);
        Ok(passages)
    }
}

/// Numbered passage list for prompts
pub fn render_passages(passages: &[Passage]) -> String {
    passages
        .iter()
        .enumerate()
        .map(|(i, p)| format!("[{}] ({})\n{}", i + 1, p.source, p.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}
