//! Ingestion Pipeline (C13): discover -> chunk -> embed in batches -> commit
//! -> incremental index update (spec.md §4.13).

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use walkdir::WalkDir;

use crate::chunker;
use crate::connection::ConnectionManager;
use crate::content_store::ContentStore;
use crate::db;
use crate::embedder::{BatchItem, Embedder};
use crate::error::{classify_io_error, RagliteError, Result};
use crate::index::{EmbeddingResult, IndexManager};
use crate::models::{ContentType, IngestStats, Mode, SystemInfo};
use crate::mode;
use crate::paths::DatasetPaths;

/// Per-call overrides (spec.md §4.13 Inputs). Unset fields fall back to the
/// current model's chunking defaults ([`chunker::default_chunk_params`]).
#[derive(Debug, Clone, Default)]
pub struct IngestionOptions {
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub force_rebuild: bool,
    /// Per-call embedder timeout override (SPEC_FULL.md §5 "Cancellation
    /// and timeouts"). `None` falls back to [`DEFAULT_EMBED_TIMEOUT`].
    pub embed_timeout: Option<Duration>,
}

/// Maximum size of a single file considered for ingestion (spec.md §4.13
/// step 1 "size cap").
const MAX_FILE_BYTES: u64 = 50 * 1024 * 1024;

/// Default embedder/reranker call timeout (spec.md §5: "Every
/// embedder/reranker call takes a timeout (default 300 s, configurable)").
pub const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_secs(300);

/// Runs `f` on its own thread and waits up to `timeout`. A hung/slow
/// embedder call surfaces as `EmbeddingError` rather than blocking the
/// batch indefinitely; the spawned thread is abandoned (not joined) on
/// timeout, matching spec.md §5's "non-fatal to the batch" semantics — the
/// caller treats this exactly like any other per-chunk embedding failure.
fn call_with_timeout<T, F>(timeout: Duration, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(timeout).map_err(|_| {
        RagliteError::EmbeddingError(format!("embedder call exceeded {timeout:?} timeout"))
    })
}

struct DiscoveredFile {
    path: PathBuf,
    content_type: ContentType,
    mime: String,
}

fn extension_info(ext: &str) -> Option<(ContentType, &'static str)> {
    match ext.to_ascii_lowercase().as_str() {
        "md" | "markdown" => Some((ContentType::Markdown, "text/markdown")),
        "txt" => Some((ContentType::Text, "text/plain")),
        "pdf" => Some((ContentType::Pdf, "application/pdf")),
        "docx" => Some((
            ContentType::Docx,
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        )),
        "jpg" | "jpeg" => Some((ContentType::Image, "image/jpeg")),
        "png" => Some((ContentType::Image, "image/png")),
        "webp" => Some((ContentType::Image, "image/webp")),
        "gif" => Some((ContentType::Image, "image/gif")),
        _ => None,
    }
}

/// Walks `dir` recursively in a stable (path-sorted) order, keeping only
/// files whose extension maps to a content type in `supported`, under the
/// per-file size cap (spec.md §4.13 step 1).
fn discover(dir: &Path, supported: &[ContentType]) -> Vec<DiscoveredFile> {
    let mut found = Vec::new();
    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        let Some((content_type, mime)) = extension_info(ext) else {
            continue;
        };
        if !supported.contains(&content_type) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if metadata.len() > MAX_FILE_BYTES {
            continue;
        }
        found.push(DiscoveredFile {
            path: path.to_path_buf(),
            content_type,
            mime: mime.to_string(),
        });
    }
    found.sort_by(|a, b| a.path.cmp(&b.path));
    found
}

/// Shares C3/C9/C5/C10 with the [`crate::search::SearchEngine`] created by
/// the same Factory `open()` call (spec.md §2).
#[derive(Clone)]
pub struct IngestionPipeline {
    conn: Arc<Mutex<Connection>>,
    index: Arc<Mutex<IndexManager>>,
    content_store: ContentStore,
    embedder: Arc<dyn Embedder>,
    connection_manager: ConnectionManager,
    paths: DatasetPaths,
    /// Cooperative sequential write queue (spec.md §5): only one ingest or
    /// rebuild runs at a time per dataset handle.
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl IngestionPipeline {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        index: Arc<Mutex<IndexManager>>,
        content_store: ContentStore,
        embedder: Arc<dyn Embedder>,
        connection_manager: ConnectionManager,
        paths: DatasetPaths,
        write_lock: Arc<tokio::sync::Mutex<()>>,
    ) -> IngestionPipeline {
        IngestionPipeline {
            conn,
            index,
            content_store,
            embedder,
            connection_manager,
            paths,
            write_lock,
        }
    }

    /// Ingests every supported file under `dir` (spec.md §4.13). CPU/IO-bound
    /// work runs on a blocking thread (SPEC_FULL.md §5); only one ingest
    /// runs at a time per dataset (§4.15 `Ready -> Ingesting`).
    pub async fn ingest_directory<P: AsRef<Path>>(
        &self,
        dir: P,
        options: IngestionOptions,
    ) -> Result<IngestStats> {
        let _guard = self.write_lock.lock().await;
        let dir = dir.as_ref().to_path_buf();
        let pipeline = self.clone();
        tokio::task::spawn_blocking(move || pipeline.run_ingest_directory(&dir, &options))
            .await
            .map_err(|e| RagliteError::Validation(format!("ingest task panicked: {e}")))?
    }

    /// Ingests a single in-memory blob (spec.md §6 `ingest_memory`), e.g. a
    /// document pasted by a caller rather than read from disk: chunked,
    /// embedded and committed exactly like a discovered file, just skipping
    /// the directory walk.
    pub async fn ingest_memory(
        &self,
        bytes: Vec<u8>,
        display_name: String,
        mime: String,
    ) -> Result<IngestStats> {
        let _guard = self.write_lock.lock().await;
        let pipeline = self.clone();
        tokio::task::spawn_blocking(move || pipeline.run_ingest_memory(bytes, display_name, mime))
            .await
            .map_err(|e| RagliteError::Validation(format!("ingest task panicked: {e}")))?
    }

    fn effective_system_info(&self, conn: &Connection) -> Result<SystemInfo> {
        if let Some(existing) = db::get_system_info(conn)? {
            return Ok(existing);
        }
        let caps = self.embedder.capabilities();
        let reranker_strategy = crate::registry::lookup(&caps.name)
            .map(|entry| entry.default_reranking_strategy)
            .unwrap_or(crate::models::RerankingStrategy::Disabled);
        let mode = if caps.model_type == crate::models::ModelType::Clip {
            Mode::Multimodal
        } else {
            Mode::Text
        };
        let info = SystemInfo {
            mode,
            model_name: caps.name.clone(),
            model_type: caps.model_type,
            model_dimensions: caps.dimensions,
            supported_content_types: caps.supported_content_types.clone(),
            reranking_strategy: reranker_strategy,
            model_version: None,
        };
        mode::store(conn, &info)?;
        Ok(info)
    }

    fn run_ingest_directory(&self, dir: &Path, options: &IngestionOptions) -> Result<IngestStats> {
        let started = Instant::now();
        let mut stats = IngestStats::default();

        if options.force_rebuild {
            self.preflight_force_rebuild()?;
        }

        let info = {
            let conn = self.conn.lock()?;
            self.effective_system_info(&conn)?
        };
        let (chunk_size, chunk_overlap) = {
            let (default_size, default_overlap) = chunker::default_chunk_params(info.model_dimensions);
            (
                options.chunk_size.unwrap_or(default_size),
                options.chunk_overlap.unwrap_or(default_overlap),
            )
        };

        let embed_timeout = options.embed_timeout.unwrap_or(DEFAULT_EMBED_TIMEOUT);
        let files = discover(dir, &info.supported_content_types);
        for file in files {
            let bytes = match std::fs::read(&file.path) {
                Ok(b) => b,
                Err(e) => {
                    let e = classify_io_error(e, &file.path);
                    tracing::warn!(file = %file.path.display(), error = %e, "document_error reading file");
                    stats.document_errors += 1;
                    continue;
                }
            };
            match self.ingest_bytes(&file, &bytes, chunk_size, chunk_overlap, embed_timeout) {
                Ok(file_stats) => {
                    stats.documents_processed += 1;
                    stats.chunks_created += file_stats.0;
                    stats.embeddings_generated += file_stats.0 - file_stats.1;
                    stats.embedding_errors += file_stats.1;
                }
                Err(e) => {
                    tracing::warn!(file = %file.path.display(), error = %e, "document_error during ingest");
                    stats.document_errors += 1;
                }
            }
        }

        stats.processing_time_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            documents = stats.documents_processed,
            chunks = stats.chunks_created,
            errors = stats.document_errors,
            "ingest batch completed"
        );
        Ok(stats)
    }

    fn run_ingest_memory(&self, bytes: Vec<u8>, display_name: String, mime: String) -> Result<IngestStats> {
        let started = Instant::now();
        let mut stats = IngestStats::default();

        let info = {
            let conn = self.conn.lock()?;
            self.effective_system_info(&conn)?
        };
        let content_type = Path::new(&display_name)
            .extension()
            .and_then(|e| e.to_str())
            .and_then(extension_info)
            .map(|(ct, _)| ct)
            .unwrap_or(ContentType::Text);
        let (default_size, default_overlap) = chunker::default_chunk_params(info.model_dimensions);

        let file = DiscoveredFile {
            path: PathBuf::from(display_name),
            content_type,
            mime,
        };
        match self.ingest_bytes(&file, &bytes, default_size, default_overlap, DEFAULT_EMBED_TIMEOUT) {
            Ok((chunks, embedding_errors)) => {
                stats.documents_processed = 1;
                stats.chunks_created = chunks;
                stats.embeddings_generated = chunks - embedding_errors;
                stats.embedding_errors = embedding_errors;
            }
            Err(e) => {
                tracing::warn!(error = %e, "document_error during ingest_memory");
                stats.document_errors = 1;
            }
        }
        stats.processing_time_ms = started.elapsed().as_millis() as u64;
        Ok(stats)
    }

    /// Deletes `index.bin`/`db.sqlite` and reopens a fresh `db.sqlite`
    /// through the connection manager's `replace_connection`, so the
    /// registry's entry for this path (and every existing `Arc` clone of
    /// it — search engine included) observes the new, empty dataset
    /// without the registry ever going without an entry for a path that
    /// still has a live, actively-written connection (spec.md §4.13
    /// `force_rebuild` preflight).
    fn preflight_force_rebuild(&self) -> Result<()> {
        self.paths.destroy_dataset_files()?;

        let fresh_conn = Connection::open(&self.paths.db_path)?;
        fresh_conn.pragma_update(None, "journal_mode", "WAL")?;
        db::ensure_schema(&fresh_conn)?;
        self.connection_manager
            .replace_connection(&self.paths.db_path, fresh_conn)?;

        let dims = {
            let index = self.index.lock()?;
            index.dimensions()
        };
        let mut index = self.index.lock()?;
        index.truncate(dims)?;
        Ok(())
    }

    /// Chunks, embeds and commits one document's bytes (spec.md §4.13 steps
    /// 2-5). Shared by both the directory walk and `ingest_memory`. Returns
    /// `(chunks_created, embedding_errors)`.
    fn ingest_bytes(
        &self,
        file: &DiscoveredFile,
        bytes: &[u8],
        chunk_size: usize,
        chunk_overlap: usize,
        embed_timeout: Duration,
    ) -> Result<(u64, u64)> {
        let title = file
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("untitled")
            .to_string();
        let source = file.path.to_string_lossy().to_string();

        let content_id = self.content_store.put(bytes, &file.mime)?;
        self.content_store.reference(&content_id)?;

        let (chunk_texts, embed_as_image) = if file.content_type == ContentType::Image {
            (vec![chunker::TextChunk { index: 0, content: title.clone() }], true)
        } else {
            let text = String::from_utf8_lossy(&bytes).to_string();
            let preprocessed = chunker::preprocess(file.content_type, &text);
            (chunker::chunk_text(&preprocessed, chunk_size, chunk_overlap)?, false)
        };

        if chunk_texts.is_empty() {
            return Ok((0, 0));
        }

        let mut embedded: Vec<(chunker::TextChunk, crate::embedder::EmbeddedItem)> = Vec::new();
        let mut embedding_errors = 0u64;

        if embed_as_image {
            for chunk in chunk_texts {
                let embedder = self.embedder.clone();
                let path = file.path.clone();
                let outcome = call_with_timeout(embed_timeout, move || embedder.embed_image(&path));
                match outcome {
                    Ok(Ok(item)) => embedded.push((chunk, item)),
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "embedding_error on image chunk");
                        embedding_errors += 1;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "embedding_error: image embed call timed out");
                        embedding_errors += 1;
                    }
                }
            }
        } else {
            let batch_size = self.embedder.capabilities().max_batch_size.max(1);
            for group in chunk_texts.chunks(batch_size) {
                let batch_items: Vec<BatchItem> = group
                    .iter()
                    .map(|c| BatchItem {
                        content: c.content.clone(),
                        content_type: file.content_type,
                    })
                    .collect();
                let embedder = self.embedder.clone();
                let results = match call_with_timeout(embed_timeout, move || {
                    embedder.embed_batch(&batch_items)
                }) {
                    Ok(results) => results,
                    Err(e) => {
                        tracing::warn!(error = %e, "embedding_error: batch embed call timed out");
                        group
                            .iter()
                            .map(|_| Err(RagliteError::EmbeddingError("embed call timed out".to_string())))
                            .collect()
                    }
                };
                for (chunk, result) in group.iter().zip(results) {
                    match result {
                        Ok(item) => embedded.push((chunk.clone(), item)),
                        Err(e) => {
                            tracing::warn!(error = %e, "embedding_error on text chunk");
                            embedding_errors += 1;
                        }
                    }
                }
            }
        }

        if embedded.is_empty() {
            return Ok((0, embedding_errors));
        }

        let chunks_created = embedded.len() as u64;
        let conn = self.conn.lock()?;
        conn.execute_batch("BEGIN IMMEDIATE;")?;

        let commit_result = (|| -> Result<()> {
            let doc_id = db::insert_document(
                &conn,
                &source,
                &title,
                file.content_type,
                Some(&content_id),
                Utc::now(),
            )?;

            for (chunk, item) in &embedded {
                db::insert_chunk(
                    &conn,
                    doc_id,
                    &item.embedding_id,
                    &chunk.content,
                    chunk.index,
                    file.content_type,
                    &json!({ "source": source }),
                )?;
            }

            let embedding_ids: Vec<String> = embedded.iter().map(|(_, i)| i.embedding_id.clone()).collect();
            let batch: Vec<EmbeddingResult> = embedded
                .iter()
                .map(|(_, item)| EmbeddingResult {
                    embedding_id: item.embedding_id.clone(),
                    vector: item.vector.clone(),
                    content_type: file.content_type,
                })
                .collect();

            let mut index = self.index.lock()?;
            index.assign_numeric_ids_locked(&conn, &embedding_ids)?;
            index.add(&batch)?;
            Ok(())
        })();

        match commit_result {
            Ok(()) => {
                conn.execute_batch("COMMIT;")?;
                Ok((chunks_created, embedding_errors))
            }
            Err(e) => {
                conn.execute_batch("ROLLBACK;").ok();
                Err(e)
            }
        }
    }
}
