//! Index Manager (C9): owns the vector index (C2), the binary format (C1),
//! the id-map, and the dual-graph multimodal routing (§4.10).

pub mod format;
pub mod id_map;
pub mod vector_index;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use rusqlite::Connection;
use std::sync::Mutex;

use crate::db;
use crate::error::{RagliteError, Result};
use crate::models::{ContentType, Mode};
use id_map::IdMap;
use vector_index::VectorIndex;

/// One embedding result ready to be inserted: the id-map key, the vector,
/// and the content type (used for dual-graph grouping in multimodal mode).
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    pub embedding_id: String,
    pub vector: Vec<f32>,
    pub content_type: ContentType,
}

pub struct IndexManager {
    index_path: PathBuf,
    conn: Arc<Mutex<Connection>>,
    dimensions: u16,
    mode: Mode,
    combined: VectorIndex,
    text_index: Option<VectorIndex>,
    image_index: Option<VectorIndex>,
    id_map: IdMap,
    /// numeric_id -> content type, needed to regroup on save.
    content_types: HashMap<u32, ContentType>,
}

impl IndexManager {
    /// Opens (loading or initializing) the index at `index_path`, enforcing
    /// the model/dimension compatibility invariant (spec.md §4.9) unless
    /// `force_recreate` is set (used by the rebuild path).
    pub fn open(
        index_path: PathBuf,
        conn: Arc<Mutex<Connection>>,
        mode: Mode,
        dimensions: u16,
        force_recreate: bool,
    ) -> Result<IndexManager> {
        let id_map = {
            let conn_guard = conn.lock()?;
            IdMap::from_pairs(db::load_id_map(&conn_guard)?)
        };

        let (combined, text_index, image_index, content_types) = if index_path.exists() {
            let file = format::load(&index_path)?;
            if !force_recreate && file.header.dimensions != dimensions {
                return Err(RagliteError::IndexDimensionMismatch {
                    expected: dimensions,
                    actual: file.header.dimensions,
                });
            }
            let combined = VectorIndex::from_file(file.clone())?;
            let mut content_types = HashMap::new();
            let (text_index, image_index) = if file.header.has_content_type_groups {
                for (id, _) in &file.text_vectors {
                    content_types.insert(*id, ContentType::Text);
                }
                for (id, _) in &file.image_vectors {
                    content_types.insert(*id, ContentType::Image);
                }
                let mut text_file = file.clone();
                text_file.vectors = file.text_vectors.clone();
                let mut image_file = file.clone();
                image_file.vectors = file.image_vectors.clone();
                (
                    Some(VectorIndex::from_file(text_file)?),
                    Some(VectorIndex::from_file(image_file)?),
                )
            } else {
                (None, None)
            };
            (combined, text_index, image_index, content_types)
        } else {
            let combined = VectorIndex::empty(dimensions);
            let (text_index, image_index) = if mode == Mode::Multimodal {
                (
                    Some(VectorIndex::empty(dimensions)),
                    Some(VectorIndex::empty(dimensions)),
                )
            } else {
                (None, None)
            };
            (combined, text_index, image_index, HashMap::new())
        };

        Ok(IndexManager {
            index_path,
            conn,
            dimensions,
            mode,
            combined,
            text_index,
            image_index,
            id_map,
            content_types,
        })
    }

    pub fn dimensions(&self) -> u16 {
        self.dimensions
    }

    pub fn count(&self) -> u32 {
        self.combined.count()
    }

    /// Assigns numeric ids and persists the `id_map` entries for a batch of
    /// embedding ids about to be inserted. Locks its own connection handle;
    /// callers that are already holding the same connection's lock (e.g. an
    /// ingestion commit transaction, spec.md §5 ordering guarantee) must use
    /// [`IndexManager::assign_numeric_ids_locked`] instead to avoid
    /// re-entering the mutex.
    pub fn assign_numeric_ids(&mut self, embedding_ids: &[String]) -> Result<Vec<u32>> {
        let conn = self.conn.lock()?;
        self.assign_numeric_ids_locked(&conn, embedding_ids)
    }

    /// Same as [`IndexManager::assign_numeric_ids`] but takes an
    /// already-locked connection, for use inside a caller-managed
    /// transaction (ingestion's per-file commit, spec.md §4.13 step 5).
    pub fn assign_numeric_ids_locked(
        &mut self,
        conn: &Connection,
        embedding_ids: &[String],
    ) -> Result<Vec<u32>> {
        let mut out = Vec::with_capacity(embedding_ids.len());
        for embedding_id in embedding_ids {
            let numeric_id = self.id_map.assign(embedding_id);
            db::insert_id_map_entry(conn, embedding_id, numeric_id)?;
            out.push(numeric_id);
        }
        Ok(out)
    }

    /// Bulk insert into the combined graph, resizing first if needed, then
    /// persists via `save` (spec.md §4.9 `add`).
    pub fn add(&mut self, batch: &[EmbeddingResult]) -> Result<()> {
        let pairs: Vec<(u32, Vec<f32>)> = batch
            .iter()
            .map(|r| {
                let numeric_id = self
                    .id_map
                    .numeric_id(&r.embedding_id)
                    .expect("assign_numeric_ids must run before add");
                self.content_types.insert(numeric_id, r.content_type);
                (numeric_id, r.vector.clone())
            })
            .collect();
        self.combined.add(&pairs)?;
        self.save()
    }

    /// Writes always go to the combined graph; grouped arrays are
    /// regenerated on save from `content_types` (§4.10: "writes always go
    /// to the combined graph").
    pub fn save(&self) -> Result<()> {
        let has_groups = self.mode == Mode::Multimodal;
        let header = self.combined.to_header(has_groups);
        let (text_vectors, image_vectors) = if has_groups {
            let mut text = Vec::new();
            let mut image = Vec::new();
            for (id, vector) in self.combined.vectors() {
                match self.content_types.get(id) {
                    Some(ContentType::Image) => image.push((*id, vector.clone())),
                    _ => text.push((*id, vector.clone())),
                }
            }
            (text, image)
        } else {
            (Vec::new(), Vec::new())
        };

        let file = format::IndexFile {
            header,
            vectors: self.combined.vectors().to_vec(),
            text_vectors,
            image_vectors,
        };
        format::save(&self.index_path, &file)
    }

    /// Dual-graph routing (§4.10): `text`/`image` queries dispatch to the
    /// matching sub-index when multimodal grouping is active; otherwise
    /// (or when `content_type` is `None`) the combined graph serves the
    /// query.
    pub fn search(
        &self,
        query: &[f32],
        k: u32,
        content_type: Option<ContentType>,
    ) -> Result<Vec<(String, f32)>> {
        let (ids, distances) = match (self.mode, content_type) {
            (Mode::Multimodal, Some(ContentType::Text)) if self.text_index.is_some() => {
                self.text_index.as_ref().unwrap().search(query, k)?
            }
            (Mode::Multimodal, Some(ContentType::Image)) if self.image_index.is_some() => {
                self.image_index.as_ref().unwrap().search(query, k)?
            }
            _ => self.combined.search(query, k)?,
        };

        let mut out = Vec::with_capacity(ids.len());
        for (numeric_id, distance) in ids.into_iter().zip(distances) {
            if let Some(embedding_id) = self.id_map.embedding_id(numeric_id) {
                out.push((embedding_id.to_string(), distance));
            }
        }
        Ok(out)
    }

    /// Truncates the graph and the persisted id-map; the caller
    /// (`rebuild_with` in the Factory/ingestion layer) re-embeds all chunks
    /// and calls `add` again. The relational store's document/chunk rows
    /// are untouched (spec.md §4.9).
    pub fn truncate(&mut self, new_dimensions: u16) -> Result<()> {
        self.dimensions = new_dimensions;
        self.combined = VectorIndex::empty(new_dimensions);
        self.text_index = if self.mode == Mode::Multimodal {
            Some(VectorIndex::empty(new_dimensions))
        } else {
            None
        };
        self.image_index = self.text_index.as_ref().map(|_| VectorIndex::empty(new_dimensions));
        self.content_types.clear();
        self.id_map.clear();
        let conn = self.conn.lock()?;
        db::truncate_chunks(&conn)?;
        Ok(())
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    /// Resets the graph, sub-indexes, content-type map and persisted
    /// id-map, but leaves `documents`/`chunks` untouched — the variant of
    /// `truncate` used by a model rebuild (spec.md §4.9 `rebuild_with`),
    /// where every chunk is about to be re-embedded under the new model in
    /// place rather than discarded.
    fn truncate_vectors_only(&mut self, new_dimensions: u16) -> Result<()> {
        self.dimensions = new_dimensions;
        self.combined = VectorIndex::empty(new_dimensions);
        self.text_index = if self.mode == Mode::Multimodal {
            Some(VectorIndex::empty(new_dimensions))
        } else {
            None
        };
        self.image_index = self.text_index.as_ref().map(|_| VectorIndex::empty(new_dimensions));
        self.content_types.clear();
        self.id_map.clear();
        let conn = self.conn.lock()?;
        db::clear_id_map(&conn)?;
        Ok(())
    }

    /// Re-embeds every existing chunk under `embedder` and rebuilds the
    /// graph from scratch, reusing each chunk's existing `embedding_id`
    /// rather than the one the embedder assigns (spec.md §4.9: "The
    /// relational store is untouched aside from the singleton update" — the
    /// id-map bridges back to the same chunk rows, so `chunks.embedding_id`
    /// never changes). Chunks whose content type the new embedder doesn't
    /// support are skipped and counted as `embedding_errors`-equivalent by
    /// the caller; they simply have no vector until a future re-ingest.
    /// Returns the number of chunks re-embedded.
    pub fn rebuild_with(&mut self, embedder: &dyn crate::embedder::Embedder) -> Result<u64> {
        let caps = embedder.capabilities();
        self.truncate_vectors_only(caps.dimensions)?;
        self.mode = if caps.supported_content_types.contains(&ContentType::Image) {
            Mode::Multimodal
        } else {
            Mode::Text
        };
        self.text_index = if self.mode == Mode::Multimodal {
            Some(VectorIndex::empty(caps.dimensions))
        } else {
            None
        };
        self.image_index = self.text_index.as_ref().map(|_| VectorIndex::empty(caps.dimensions));

        let chunks = {
            let conn = self.conn.lock()?;
            db::all_chunks_ordered(&conn)?
        };

        let mut reembedded = 0u64;
        for batch in chunks.chunks(caps.max_batch_size.max(1)) {
            let mut results = Vec::with_capacity(batch.len());
            let mut embedding_ids = Vec::with_capacity(batch.len());
            for chunk in batch {
                if !caps.supported_content_types.contains(&chunk.content_type) {
                    continue;
                }
                let embedded = match embedder.embed_text(&chunk.content) {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::warn!(
                            chunk_id = chunk.id,
                            error = %e,
                            "skipping chunk during rebuild: embedding failed"
                        );
                        continue;
                    }
                };
                embedding_ids.push(chunk.embedding_id.clone());
                results.push(EmbeddingResult {
                    embedding_id: chunk.embedding_id.clone(),
                    vector: embedded.vector,
                    content_type: chunk.content_type,
                });
            }
            if results.is_empty() {
                continue;
            }
            self.assign_numeric_ids(&embedding_ids)?;
            self.add(&results)?;
            reembedded += results.len() as u64;
        }
        Ok(reembedded)
    }
}
