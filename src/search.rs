//! Semantic search with multi-factor ranking.
//!
//! The query is embedded, filters are translated to the store's filter
//! model, and `limit × candidate_multiplier` candidates at or above the
//! similarity threshold are fetched. Each candidate then gets a blended score
//! in `[0, 1]`:
//!
//! ```text
//! score = (w_s·similarity + w_r·recency + w_a·affinity + w_u·usage) / Σw
//! ```
//!
//! - **similarity**: cosine similarity clamped to `[0, 1]`.
//! - **recency**: linear decay from 1 (modified now) to 0 at
//!   `recency_max_age_days`.
//! - **affinity**: 1 when the candidate's category matches what the query
//!   looks like it wants (code, documentation, issues), 0 when it does not,
//!   0.5 when the query gives no signal.
//! - **usage**: hit count of the vector in earlier results, log-scaled and
//!   normalized by the largest count among the candidates.
//!
//! The threshold applies to raw similarity, before blending.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::config::{RetrievalConfig, ScoreWeights};
use crate::embedding::ProviderManager;
use crate::error::{IndexError, Result};
use crate::models::{SearchFilters, SearchQuery, SearchResult};
use crate::store::{ScoredPoint, VectorFilter, VectorStore};

const MAX_HIGHLIGHTS: usize = 3;
const MAX_HIGHLIGHT_CHARS: usize = 200;

/// Read-only query path over the active collection.
pub struct SearchEngine {
    config: RetrievalConfig,
    embedder: Arc<ProviderManager>,
    store: Arc<dyn VectorStore>,
    collection: Arc<RwLock<String>>,
    /// Times each vector id has been returned.
    usage: Mutex<HashMap<String, u64>>,
}

impl SearchEngine {
    pub fn new(
        config: &RetrievalConfig,
        embedder: Arc<ProviderManager>,
        store: Arc<dyn VectorStore>,
        collection: Arc<RwLock<String>>,
    ) -> Self {
        Self {
            config: config.clone(),
            embedder,
            store,
            collection,
            usage: Mutex::new(HashMap::new()),
        }
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        if query.query.trim().is_empty() {
            return Err(IndexError::InvalidInput("query must not be empty".into()));
        }
        let limit = query.limit.unwrap_or(self.config.default_limit);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let threshold = query.threshold.unwrap_or(self.config.similarity_threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(IndexError::InvalidInput(format!(
                "threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        let filter = build_filter(&query.filters)?;

        let vector = self.embedder.embed(&query.query).await?;
        let collection = self.collection.read().await.clone();
        let candidates = self
            .store
            .search(
                &collection,
                &vector,
                limit.saturating_mul(self.config.candidate_multiplier.max(1)),
                threshold,
                &filter,
            )
            .await?;
        debug!(
            collection = %collection,
            candidates = candidates.len(),
            "vector search returned candidates"
        );
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let counts: Vec<u64> = {
            let usage = self.usage.lock().await;
            candidates
                .iter()
                .map(|c| usage.get(&c.id).copied().unwrap_or(0))
                .collect()
        };
        let intent = query_intent(&query.query);
        let now = chrono::Utc::now().timestamp();

        let mut scored: Vec<(f64, ScoredPoint)> = candidates
            .into_iter()
            .zip(&counts)
            .map(|(c, &count)| {
                let factors = Factors {
                    similarity: (c.score as f64).clamp(0.0, 1.0),
                    recency: recency(c.payload.metadata.modified, now, self.config.recency_max_age_days),
                    affinity: affinity(intent, &c.payload.metadata.category),
                    usage: usage_factor(count, &counts),
                };
                (blend(&factors, &self.config.weights), c)
            })
            .collect();

        scored.sort_by(|(sa, a), (sb, b)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(limit);

        {
            let mut usage = self.usage.lock().await;
            for (_, point) in &scored {
                *usage.entry(point.id.clone()).or_insert(0) += 1;
            }
        }

        let terms = query_terms(&query.query);
        Ok(scored
            .into_iter()
            .map(|(score, point)| {
                let highlights = query
                    .include_highlights
                    .then(|| highlight_lines(&point.payload.content, &terms));
                SearchResult {
                    id: point.id,
                    score,
                    similarity: point.score,
                    content: query.include_content.then_some(point.payload.content),
                    metadata: point.payload.metadata,
                    highlights,
                    chunk: point.payload.chunk,
                }
            })
            .collect())
    }
}

/// Translate search filters to payload conditions, AND-combined.
pub fn build_filter(filters: &SearchFilters) -> Result<VectorFilter> {
    if let (Some(after), Some(before)) = (filters.modified_after, filters.modified_before) {
        if after > before {
            return Err(IndexError::InvalidInput(format!(
                "modified_after ({}) is later than modified_before ({})",
                after, before
            )));
        }
    }

    let mut filter = VectorFilter::default();
    if let Some(category) = &filters.category {
        filter = filter.equals("metadata.category", category.as_str());
    }
    if let Some(file_type) = &filters.file_type {
        filter = filter.equals(
            "metadata.file_type",
            file_type.trim_start_matches('.').to_lowercase(),
        );
    }
    if let Some(language) = &filters.language {
        filter = filter.equals("metadata.language", language.as_str());
    }
    if !filters.tags.is_empty() {
        filter = filter.any_of(
            "metadata.tags",
            filters.tags.iter().map(|t| t.as_str().into()).collect(),
        );
    }
    if filters.modified_after.is_some() || filters.modified_before.is_some() {
        filter = filter.range(
            "metadata.modified",
            filters.modified_after.map(|t| t as f64),
            filters.modified_before.map(|t| t as f64),
        );
    }
    Ok(filter)
}

struct Factors {
    similarity: f64,
    recency: f64,
    affinity: f64,
    usage: f64,
}

fn blend(f: &Factors, w: &ScoreWeights) -> f64 {
    let total = w.similarity + w.recency + w.affinity + w.usage;
    if total <= 0.0 {
        return f.similarity;
    }
    (w.similarity * f.similarity + w.recency * f.recency + w.affinity * f.affinity + w.usage * f.usage)
        / total
}

fn recency(modified: i64, now: i64, max_age_days: u32) -> f64 {
    if max_age_days == 0 {
        return 0.0;
    }
    let age_days = (now - modified).max(0) as f64 / 86_400.0;
    (1.0 - age_days / max_age_days as f64).clamp(0.0, 1.0)
}

/// Category a query appears to target.
fn query_intent(query: &str) -> Option<&'static str> {
    let lower = query.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .collect();
    let has = |list: &[&str]| words.iter().any(|w| list.contains(w));

    let code_syntax = ["()", "::", "=>", "->", "{", "fn ", "def "]
        .iter()
        .any(|s| query.contains(s))
        || query
            .split_whitespace()
            .any(|w| w.contains('_') || is_camel_case(w));

    if has(&["bug", "crash", "issue", "regression", "broken", "workaround"]) {
        Some("issue")
    } else if code_syntax
        || has(&[
            "function", "method", "class", "interface", "struct", "impl", "implementation",
            "signature", "return", "returns", "variable", "type",
        ])
    {
        Some("code")
    } else if has(&["how", "why", "guide", "docs", "documentation", "explain", "overview", "tutorial"]) {
        Some("documentation")
    } else {
        None
    }
}

fn is_camel_case(word: &str) -> bool {
    let mut chars = word.chars();
    matches!(chars.next(), Some(c) if c.is_lowercase())
        && chars.any(|c| c.is_uppercase())
}

fn affinity(intent: Option<&str>, category: &str) -> f64 {
    match intent {
        Some(wanted) if wanted == category => 1.0,
        Some(_) => 0.0,
        None => 0.5,
    }
}

fn usage_factor(count: u64, all: &[u64]) -> f64 {
    let max = all.iter().copied().max().unwrap_or(0);
    if max == 0 {
        return 0.0;
    }
    (1.0 + count as f64).ln() / (1.0 + max as f64).ln()
}

fn query_terms(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_string)
        .collect()
}

/// Lines of `content` containing any query term, trimmed and capped.
fn highlight_lines(content: &str, terms: &[String]) -> Vec<String> {
    if terms.is_empty() {
        return Vec::new();
    }
    content
        .lines()
        .map(str::trim)
        .filter(|line| {
            let lower = line.to_lowercase();
            terms.iter().any(|t| lower.contains(t.as_str()))
        })
        .take(MAX_HIGHLIGHTS)
        .map(|line| line.chars().take(MAX_HIGHLIGHT_CHARS).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Condition;

    #[test]
    fn filters_translate_to_and_conditions() {
        let filters = SearchFilters {
            category: Some("code".into()),
            file_type: Some(".TS".into()),
            language: None,
            tags: vec!["api".into()],
            modified_after: Some(10),
            modified_before: None,
        };
        let f = build_filter(&filters).unwrap();
        assert_eq!(f.conditions.len(), 4);
        assert_eq!(
            f.conditions[1],
            Condition::Equals {
                field: "metadata.file_type".into(),
                value: "ts".into()
            }
        );
        assert_eq!(
            f.conditions[3],
            Condition::Range {
                field: "metadata.modified".into(),
                gte: Some(10.0),
                lte: None
            }
        );
        assert!(build_filter(&SearchFilters::default()).unwrap().is_empty());
    }

    #[test]
    fn inverted_date_range_is_rejected() {
        let filters = SearchFilters {
            modified_after: Some(20),
            modified_before: Some(10),
            ..Default::default()
        };
        assert!(matches!(build_filter(&filters), Err(IndexError::InvalidInput(_))));
    }

    #[test]
    fn recency_decays_linearly() {
        let day = 86_400;
        assert!((recency(1000 * day, 1000 * day, 100) - 1.0).abs() < 1e-9);
        assert!((recency(950 * day, 1000 * day, 100) - 0.5).abs() < 1e-9);
        assert_eq!(recency(0, 1000 * day, 100), 0.0);
        // Future timestamps count as fresh.
        assert_eq!(recency(2000 * day, 1000 * day, 100), 1.0);
    }

    #[test]
    fn intent_detection() {
        assert_eq!(query_intent("parseConfig returns what"), Some("code"));
        assert_eq!(query_intent("crash on startup"), Some("issue"));
        assert_eq!(query_intent("how do I deploy"), Some("documentation"));
        assert_eq!(query_intent("deployment"), None);
    }

    #[test]
    fn similarity_dominates_blend() {
        let w = ScoreWeights::default();
        let strong = blend(
            &Factors { similarity: 0.95, recency: 0.0, affinity: 0.0, usage: 0.0 },
            &w,
        );
        let weak = blend(
            &Factors { similarity: 0.5, recency: 1.0, affinity: 1.0, usage: 1.0 },
            &w,
        );
        assert!(strong > weak);
        let top = blend(
            &Factors { similarity: 1.0, recency: 1.0, affinity: 1.0, usage: 1.0 },
            &w,
        );
        assert!((top - 1.0).abs() < 1e-9);
    }

    #[test]
    fn usage_is_normalized() {
        assert_eq!(usage_factor(0, &[0, 0]), 0.0);
        assert!((usage_factor(4, &[4, 1]) - 1.0).abs() < 1e-9);
        let mid = usage_factor(1, &[4, 1]);
        assert!(mid > 0.0 && mid < 1.0);
    }

    #[test]
    fn highlights_pick_matching_lines() {
        let content = "fn add(a, b)\n  a + b\n// adds numbers\nunrelated";
        let lines = highlight_lines(content, &query_terms("add numbers"));
        assert_eq!(lines, vec!["fn add(a, b)", "// adds numbers"]);
    }
}
