//! Reranker interface (C11): post-ANN reordering, fixed at dataset
//! creation time and stored in `SystemInfo` (spec.md §4.12).
//!
//! Failure here is recoverable by contract: a caller whose `rerank` call
//! errors falls back to the pre-rerank order and surfaces a warning rather
//! than failing the query (spec.md §4.12, §7).

use crate::error::Result;
use crate::models::{ContentType, RerankingStrategy};

/// One candidate passed into [`Reranker::rerank`] and returned, possibly
/// reordered and rescored.
#[derive(Debug, Clone)]
pub struct RerankCandidate {
    pub embedding_id: String,
    pub content: String,
    pub score: f32,
}

/// `rerank(query, candidates, content_type?) -> candidates'` returns a
/// permutation with possibly updated scores; length is unchanged and no
/// candidate is fabricated (spec.md §6).
pub trait Reranker: Send + Sync {
    fn strategy(&self) -> RerankingStrategy;

    fn rerank(
        &self,
        query: &str,
        candidates: Vec<RerankCandidate>,
        content_type: Option<ContentType>,
    ) -> Result<Vec<RerankCandidate>>;
}

/// Identity reranker for `RerankingStrategy::Disabled`.
pub struct DisabledReranker;

impl Reranker for DisabledReranker {
    fn strategy(&self) -> RerankingStrategy {
        RerankingStrategy::Disabled
    }

    fn rerank(
        &self,
        _query: &str,
        candidates: Vec<RerankCandidate>,
        _content_type: Option<ContentType>,
    ) -> Result<Vec<RerankCandidate>> {
        Ok(candidates)
    }
}

/// A deterministic test double standing in for a real cross-encoder/
/// text-derived reranker (spec.md §1 Non-goals — model runtimes are out of
/// scope for the core). Scores candidates by the fraction of query words
/// that appear in the candidate text, which is enough to exercise the
/// pipeline's "pass through C11, fall back on error" wiring without a real
/// model.
pub struct FakeReranker {
    strategy: RerankingStrategy,
    pub fail: bool,
}

impl FakeReranker {
    pub fn new(strategy: RerankingStrategy) -> FakeReranker {
        FakeReranker {
            strategy,
            fail: false,
        }
    }

    pub fn failing(strategy: RerankingStrategy) -> FakeReranker {
        FakeReranker {
            strategy,
            fail: true,
        }
    }

    fn overlap_score(query: &str, content: &str) -> f32 {
        let query_words: Vec<String> = query.to_lowercase().split_whitespace().map(String::from).collect();
        if query_words.is_empty() {
            return 0.0;
        }
        let content_lower = content.to_lowercase();
        let hits = query_words
            .iter()
            .filter(|w| content_lower.contains(w.as_str()))
            .count();
        hits as f32 / query_words.len() as f32
    }
}

impl Reranker for FakeReranker {
    fn strategy(&self) -> RerankingStrategy {
        self.strategy
    }

    fn rerank(
        &self,
        query: &str,
        mut candidates: Vec<RerankCandidate>,
        _content_type: Option<ContentType>,
    ) -> Result<Vec<RerankCandidate>> {
        if self.fail {
            return Err(crate::error::RagliteError::RerankFailed(
                "fake reranker configured to fail".to_string(),
            ));
        }
        for candidate in candidates.iter_mut() {
            candidate.score = Self::overlap_score(query, &candidate.content);
        }
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(candidates)
    }
}
