//! Factory (C15): the single entry point that opens a dataset root and
//! wires C1-C14 together into an [`IngestionPipeline`]/[`SearchEngine`]
//! pair (spec.md §2, §6).

use std::sync::Arc;

use crate::connection::{ConnectionHandle, ConnectionManager};
use crate::content_store::ContentStore;
use crate::db;
use crate::embedder::Embedder;
use crate::error::{RagliteError, Result};
use crate::index::IndexManager;
use crate::ingestion::IngestionPipeline;
use crate::mode;
use crate::models::{DatasetStats, Mode};
use crate::paths::DatasetPaths;
use crate::reranker::{DisabledReranker, Reranker};
use crate::search::SearchEngine;

/// A handle to an opened dataset: one ingestion pipeline and one search
/// engine sharing the same connection, index and content store (spec.md
/// §2, §5).
pub struct Dataset {
    pub ingestion: IngestionPipeline,
    pub search: SearchEngine,
    conn: Arc<std::sync::Mutex<rusqlite::Connection>>,
    index: Arc<std::sync::Mutex<IndexManager>>,
    connection_manager: ConnectionManager,
    connection_handle: ConnectionHandle,
    paths: DatasetPaths,
}

impl Dataset {
    /// Opens `root`, creating `.raglite/` layout if missing.
    ///
    /// Compatibility is enforced before any index bytes are touched (spec.md
    /// §4.9 testable property): if a `system_info` row already exists and
    /// names a different model than `embedder`, this returns
    /// `ModelIncompatible` rather than silently reinterpreting the stored
    /// vectors under the new dimensionality.
    pub fn open<P: AsRef<std::path::Path>>(
        root: P,
        embedder: Arc<dyn Embedder>,
        reranker: Option<Arc<dyn Reranker>>,
    ) -> Result<Dataset> {
        let paths = DatasetPaths::resolve(root)?;
        let connection_manager = ConnectionManager::new();
        let handle = connection_manager.acquire(&paths.db_path)?;
        let conn = handle.conn().clone();

        {
            let conn_guard = conn.lock()?;
            db::ensure_schema(&conn_guard)?;
        }

        let caps = embedder.capabilities();
        let existing = {
            let conn_guard = conn.lock()?;
            mode::detect(&conn_guard)?
        };
        let materialized = {
            let conn_guard = conn.lock()?;
            mode::is_materialized(&conn_guard)?
        };
        if materialized
            && (existing.model_name != caps.name || existing.model_dimensions != caps.dimensions)
        {
            return Err(RagliteError::ModelIncompatible {
                stored_model: existing.model_name,
                stored_dims: existing.model_dimensions,
                requested_model: caps.name.clone(),
                requested_dims: caps.dimensions,
            });
        }

        let mode = if materialized { existing.mode } else { Mode::Text };
        let index = Arc::new(std::sync::Mutex::new(IndexManager::open(
            paths.index_path.clone(),
            conn.clone(),
            mode,
            caps.dimensions,
            false,
        )?));

        let content_store = ContentStore::new(paths.content_dir.clone(), conn.clone());
        let reranker: Arc<dyn Reranker> = reranker.unwrap_or_else(|| Arc::new(DisabledReranker));
        let write_lock = Arc::new(tokio::sync::Mutex::new(()));

        let ingestion = IngestionPipeline::new(
            conn.clone(),
            index.clone(),
            content_store,
            embedder.clone(),
            connection_manager.clone(),
            paths.clone(),
            write_lock,
        );
        let search = SearchEngine::new(conn.clone(), index.clone(), embedder, reranker);

        Ok(Dataset {
            ingestion,
            search,
            conn,
            index,
            connection_manager,
            connection_handle: handle,
            paths,
        })
    }

    /// Dataset-wide statistics (spec.md §6 `stats`).
    pub fn stats(&self) -> Result<DatasetStats> {
        let conn = self.conn.lock()?;
        let info = mode::detect(&conn)?;
        let total_chunks = db::count_chunks(&conn)?;
        let total_documents = db::count_documents(&conn)?;
        drop(conn);

        let db_size = std::fs::metadata(&self.paths.db_path).map(|m| m.len()).unwrap_or(0);
        let index_size = std::fs::metadata(&self.paths.index_path).map(|m| m.len()).unwrap_or(0);

        Ok(DatasetStats {
            total_chunks,
            total_documents,
            reranking_enabled: !matches!(
                info.reranking_strategy,
                crate::models::RerankingStrategy::Disabled
            ),
            mode: info.mode,
            model_name: info.model_name,
            model_dimensions: info.model_dimensions,
            db_size,
            index_size,
        })
    }

    /// Releases the dataset's shared connection back to the registry
    /// (spec.md §6 `close`). A further `search`/`ingest` call on a cloned
    /// handle still works; `close` only drops this `Dataset`'s own
    /// reference-counted hold.
    pub fn close(self) -> Result<()> {
        drop(self.connection_handle);
        let _ = self.index.lock()?;
        Ok(())
    }

    /// Switches the dataset to a different model, re-embedding every
    /// existing chunk in place (spec.md §4.9 `rebuild_with`, §6 `rebuild`,
    /// §8 scenarios S3/S4). The relational store's `documents`/`chunks`
    /// rows are untouched aside from the `system_info` singleton; only the
    /// vector graph and id-map are rebuilt. Consumes `self` and returns a
    /// fresh `Dataset` wired to the new embedder/reranker, sharing the same
    /// underlying connection and index.
    pub async fn rebuild(
        self,
        embedder: Arc<dyn Embedder>,
        reranker: Option<Arc<dyn Reranker>>,
    ) -> Result<Dataset> {
        let index = self.index.clone();
        let conn = self.conn.clone();
        let embedder_for_index = embedder.clone();
        let reembedded = tokio::task::spawn_blocking(move || -> Result<u64> {
            let mut index = index.lock()?;
            index.rebuild_with(embedder_for_index.as_ref())
        })
        .await
        .map_err(|e| RagliteError::Validation(format!("rebuild task panicked: {e}")))??;
        tracing::info!(reembedded, "rebuild re-embedded existing chunks under new model");

        let caps = embedder.capabilities();
        let info = mode::system_info_for_model(&caps.name)?;
        {
            let conn_guard = conn.lock()?;
            mode::store(&conn_guard, &info)?;
        }
        {
            let mut index_guard = self.index.lock()?;
            index_guard.set_mode(info.mode);
        }

        let content_store = ContentStore::new(self.paths.content_dir.clone(), conn.clone());
        let reranker: Arc<dyn Reranker> = reranker.unwrap_or_else(|| Arc::new(DisabledReranker));
        let write_lock = Arc::new(tokio::sync::Mutex::new(()));

        let ingestion = IngestionPipeline::new(
            conn.clone(),
            self.index.clone(),
            content_store,
            embedder.clone(),
            self.connection_manager.clone(),
            self.paths.clone(),
            write_lock,
        );
        let search = SearchEngine::new(conn.clone(), self.index.clone(), embedder, reranker);

        Ok(Dataset {
            ingestion,
            search,
            conn,
            index: self.index,
            connection_manager: self.connection_manager,
            connection_handle: self.connection_handle,
            paths: self.paths,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::FakeEmbedder;
    use crate::ingestion::IngestionOptions;

    #[tokio::test]
    async fn open_creates_layout_and_defaults_to_text_mode() {
        let tmp = tempfile::tempdir().unwrap();
        let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder::minilm());
        let dataset = Dataset::open(tmp.path(), embedder, None).unwrap();
        let stats = dataset.stats().unwrap();
        assert_eq!(stats.total_documents, 0);
        assert_eq!(stats.model_name, "MiniLM-L6-v2");
    }

    #[tokio::test]
    async fn reopening_with_incompatible_model_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.md"), "hello world").unwrap();

        let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder::minilm());
        let dataset = Dataset::open(tmp.path(), embedder, None).unwrap();
        dataset
            .ingestion
            .ingest_directory(tmp.path(), IngestionOptions::default())
            .await
            .unwrap();
        dataset.close().unwrap();

        let other: Arc<dyn Embedder> = Arc::new(FakeEmbedder::mpnet());
        let err = Dataset::open(tmp.path(), other, None).unwrap_err();
        assert!(matches!(err, RagliteError::ModelIncompatible { .. }));
    }

    #[tokio::test]
    async fn ingest_then_search_round_trips_through_the_factory() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.md"), "cats sleep a lot").unwrap();

        let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder::minilm());
        let dataset = Dataset::open(tmp.path(), embedder, None).unwrap();
        dataset
            .ingestion
            .ingest_directory(tmp.path(), IngestionOptions::default())
            .await
            .unwrap();

        let results = dataset.search.search("feline naps", 5, None, false).await.unwrap();
        assert!(!results.is_empty());
    }

    #[tokio::test]
    async fn rebuild_switches_model_and_preserves_searchability() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.md"), "cats sleep a lot").unwrap();

        let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder::minilm());
        let dataset = Dataset::open(tmp.path(), embedder, None).unwrap();
        dataset
            .ingestion
            .ingest_directory(tmp.path(), IngestionOptions::default())
            .await
            .unwrap();

        let new_embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder::mpnet());
        let dataset = dataset.rebuild(new_embedder, None).await.unwrap();
        let stats = dataset.stats().unwrap();
        assert_eq!(stats.model_name, "mpnet-base-v2");
        assert_eq!(stats.model_dimensions, 768);
        assert_eq!(stats.total_documents, 1);

        let results = dataset.search.search("feline naps", 5, None, false).await.unwrap();
        assert!(!results.is_empty());
    }
}
