//! Search Pipeline (C14): query -> embed -> ANN search -> join -> rerank
//! (spec.md §4.14).

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::db;
use crate::embedder::Embedder;
use crate::error::{RagliteError, Result};
use crate::index::IndexManager;
use crate::models::{ContentType, DocumentRef, SearchResult};
use crate::reranker::{RerankCandidate, Reranker};

/// Widens the ANN search beyond `top_k` so the reranker has a real pool to
/// reorder (spec.md §4.14 step 2): no widening when reranking is disabled,
/// 3x otherwise.
fn k_expand(reranking_enabled: bool) -> u32 {
    if reranking_enabled {
        3
    } else {
        1
    }
}

/// Shares C3/C9/C5/C10/C11 with the [`crate::ingestion::IngestionPipeline`]
/// created by the same Factory `open()` call (spec.md §2).
pub struct SearchEngine {
    conn: Arc<Mutex<Connection>>,
    index: Arc<Mutex<IndexManager>>,
    embedder: Arc<dyn Embedder>,
    reranker: Arc<dyn Reranker>,
}

impl SearchEngine {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        index: Arc<Mutex<IndexManager>>,
        embedder: Arc<dyn Embedder>,
        reranker: Arc<dyn Reranker>,
    ) -> SearchEngine {
        SearchEngine {
            conn,
            index,
            embedder,
            reranker,
        }
    }

    /// Runs a query (spec.md §4.14). An empty/whitespace query returns an
    /// empty result set, not an error (step 1). `rerank` opts into C11 for
    /// this call only: reranking is off by default even when a reranker was
    /// wired into this dataset at open time (spec.md §4.12, §6 Factory API
    /// `search(query, {top_k, rerank, content_type})`).
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        content_type: Option<ContentType>,
        rerank: bool,
    ) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let query = query.to_string();
        let engine = self.clone_inner();
        tokio::task::spawn_blocking(move || engine.run_search(&query, top_k, content_type, rerank))
            .await
            .map_err(|e| RagliteError::Validation(format!("search task panicked: {e}")))?
    }

    fn clone_inner(&self) -> SearchEngine {
        SearchEngine {
            conn: self.conn.clone(),
            index: self.index.clone(),
            embedder: self.embedder.clone(),
            reranker: self.reranker.clone(),
        }
    }

    fn run_search(
        &self,
        query: &str,
        top_k: usize,
        content_type: Option<ContentType>,
        rerank: bool,
    ) -> Result<Vec<SearchResult>> {
        let reranking_enabled = rerank
            && !matches!(
                self.reranker.strategy(),
                crate::models::RerankingStrategy::Disabled
            );
        let embedded = self.embedder.embed_text(query)?;

        let k = (top_k as u32).saturating_mul(k_expand(reranking_enabled)).max(top_k as u32);
        let hits = {
            let index = self.index.lock()?;
            index.search(&embedded.vector, k, content_type)?
        };
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let embedding_ids: Vec<String> = hits.iter().map(|(id, _)| id.clone()).collect();
        let chunks = {
            let conn = self.conn.lock()?;
            db::get_chunks_by_embedding_ids(&conn, &embedding_ids)?
        };
        let chunk_by_embedding_id: std::collections::HashMap<&str, &crate::models::Chunk> = chunks
            .iter()
            .map(|c| (c.embedding_id.as_str(), c))
            .collect();

        let mut candidates = Vec::new();
        for (embedding_id, distance) in &hits {
            let Some(chunk) = chunk_by_embedding_id.get(embedding_id.as_str()) else {
                continue;
            };
            candidates.push(RerankCandidate {
                embedding_id: embedding_id.clone(),
                content: chunk.content.clone(),
                // spec.md §4.14 step 5: score = 1 - distance, so closer
                // matches (smaller ANN distance) rank with a higher score.
                score: 1.0 - *distance,
            });
        }

        let reranked = if reranking_enabled {
            match self.reranker.rerank(query, candidates.clone(), content_type) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(error = %e, "reranking failed, falling back to ANN order");
                    candidates
                }
            }
        } else {
            candidates
        };

        let mut results = Vec::with_capacity(reranked.len().min(top_k));
        for candidate in reranked.into_iter().take(top_k) {
            let Some(chunk) = chunk_by_embedding_id.get(candidate.embedding_id.as_str()) else {
                continue;
            };
            let conn = self.conn.lock()?;
            let document = db::get_document(&conn, chunk.document_id)?;
            let Some(document) = document else {
                continue;
            };
            results.push(SearchResult {
                content: candidate.content,
                score: candidate.score,
                content_type: chunk.content_type,
                document: DocumentRef {
                    id: document.id,
                    source: document.source,
                    title: document.title,
                    content_type: document.content_type,
                    content_id: document.content_id,
                },
                metadata: chunk.metadata.clone(),
            });
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionManager;
    use crate::content_store::ContentStore;
    use crate::db::ensure_schema;
    use crate::embedder::FakeEmbedder;
    use crate::ingestion::{IngestionOptions, IngestionPipeline};
    use crate::models::Mode;
    use crate::paths::DatasetPaths;
    use crate::reranker::{DisabledReranker, FakeReranker};
    use std::fs;

    async fn seeded(reranker: Arc<dyn Reranker>) -> (SearchEngine, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let paths = DatasetPaths::resolve(tmp.path()).unwrap();
        let conn = Connection::open(&paths.db_path).unwrap();
        ensure_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        let index = Arc::new(Mutex::new(
            IndexManager::open(paths.index_path.clone(), conn.clone(), Mode::Text, 384, false).unwrap(),
        ));
        let content_store = ContentStore::new(paths.content_dir.clone(), conn.clone());
        let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder::minilm());
        let manager = ConnectionManager::new();
        let write_lock = Arc::new(tokio::sync::Mutex::new(()));
        let pipeline = IngestionPipeline::new(
            conn.clone(),
            index.clone(),
            content_store,
            embedder.clone(),
            manager,
            paths,
            write_lock,
        );

        fs::write(tmp.path().join("cats.md"), "cats sleep a lot and nap often").unwrap();
        fs::write(tmp.path().join("dogs.md"), "dogs chase balls and bark loudly").unwrap();
        pipeline
            .ingest_directory(tmp.path(), IngestionOptions::default())
            .await
            .unwrap();

        (SearchEngine::new(conn, index, embedder, reranker), tmp)
    }

    #[tokio::test]
    async fn empty_query_returns_empty_results_not_error() {
        let (engine, _tmp) = seeded(Arc::new(DisabledReranker)).await;
        let results = engine.search("   ", 5, None, false).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn search_finds_relevant_chunk() {
        let (engine, _tmp) = seeded(Arc::new(DisabledReranker)).await;
        let results = engine.search("feline naps", 5, None, false).await.unwrap();
        assert!(!results.is_empty());
        assert!(results[0].content.contains("cats"));
    }

    #[tokio::test]
    async fn rerank_is_off_by_default_even_with_a_reranker_wired_in() {
        let (engine, _tmp) = seeded(Arc::new(FakeReranker::failing(
            crate::models::RerankingStrategy::CrossEncoder,
        )))
        .await;
        // rerank=false: the failing reranker is never invoked, so this succeeds.
        let results = engine.search("feline naps", 5, None, false).await.unwrap();
        assert!(!results.is_empty());
    }

    #[tokio::test]
    async fn reranker_failure_falls_back_to_ann_order() {
        let (engine, _tmp) = seeded(Arc::new(FakeReranker::failing(
            crate::models::RerankingStrategy::CrossEncoder,
        )))
        .await;
        let results = engine.search("feline naps", 5, None, true).await.unwrap();
        assert!(!results.is_empty());
    }

    #[tokio::test]
    async fn top_k_truncates_results() {
        let (engine, _tmp) = seeded(Arc::new(DisabledReranker)).await;
        let results = engine.search("animals", 1, None, false).await.unwrap();
        assert!(results.len() <= 1);
    }

    #[test]
    fn k_expand_widens_only_when_reranking() {
        assert_eq!(k_expand(false), 1);
        assert_eq!(k_expand(true), 3);
    }
}
