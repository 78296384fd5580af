//! Relational metadata store (C3): documents, chunks, the system-info
//! singleton, content blobs, and the persisted id-map. Schema init and
//! migration live here; the connection lifecycle itself is C4
//! ([`crate::connection`]).

mod schema;

use std::collections::HashSet;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value as Json;

use crate::error::{RagliteError, Result};
use crate::models::{Chunk, ContentBlob, ContentType, Document, ModelType, Mode, RerankingStrategy, SystemInfo};

/// Initializes the schema if missing and runs an idempotent migration that
/// adds any columns a prior version of this crate didn't create yet
/// (spec.md §4.3). Safe to call on every open.
pub fn ensure_schema(conn: &Connection) -> Result<()> {
    for stmt in schema::ALL_TABLES {
        conn.execute_batch(stmt)?;
    }
    migrate_missing_columns(conn)?;
    Ok(())
}

/// Adds columns that earlier schema versions omitted. There is exactly one
/// such column today (`content_blobs.ref_count`, added after the first
/// released schema); future additions follow the same
/// `PRAGMA table_info` -> `ALTER TABLE ... ADD COLUMN` pattern.
fn migrate_missing_columns(conn: &Connection) -> Result<()> {
    let mut existing = HashSet::new();
    {
        let mut stmt = conn.prepare("PRAGMA table_info(content_blobs)")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let name: String = row.get(1)?;
            existing.insert(name);
        }
    }
    if !existing.contains("ref_count") {
        conn.execute_batch(
            "ALTER TABLE content_blobs ADD COLUMN ref_count INTEGER NOT NULL DEFAULT 0;",
        )?;
    }
    Ok(())
}

fn content_type_csv(types: &[ContentType]) -> String {
    serde_json::to_string(&types.iter().map(|t| t.as_str()).collect::<Vec<_>>())
        .unwrap_or_else(|_| "[]".to_string())
}

fn parse_content_types(s: &str) -> Vec<ContentType> {
    serde_json::from_str::<Vec<String>>(s)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|t| ContentType::parse(&t))
        .collect()
}

fn timestamp_to_i64(ts: DateTime<Utc>) -> i64 {
    ts.timestamp()
}

fn i64_to_timestamp(v: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(v, 0).single().unwrap_or_else(Utc::now)
}

// --- documents -------------------------------------------------------

pub fn insert_document(
    conn: &Connection,
    source: &str,
    title: &str,
    content_type: ContentType,
    content_id: Option<&str>,
    created_at: DateTime<Utc>,
) -> Result<u64> {
    conn.execute(
        "INSERT INTO documents (source, title, content_type, content_id, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            source,
            title,
            content_type.as_str(),
            content_id,
            timestamp_to_i64(created_at)
        ],
    )?;
    Ok(conn.last_insert_rowid() as u64)
}

pub fn get_document(conn: &Connection, id: u64) -> Result<Option<Document>> {
    conn.query_row(
        "SELECT id, source, title, content_type, content_id, created_at FROM documents WHERE id = ?1",
        params![id],
        row_to_document,
    )
    .optional()
    .map_err(RagliteError::from)
}

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    let content_type: String = row.get(3)?;
    let created_at: i64 = row.get(5)?;
    Ok(Document {
        id: row.get::<_, i64>(0)? as u64,
        source: row.get(1)?,
        title: row.get(2)?,
        content_type: ContentType::parse(&content_type).unwrap_or(ContentType::Text),
        content_id: row.get(4)?,
        created_at: i64_to_timestamp(created_at),
    })
}

pub fn count_documents(conn: &Connection) -> Result<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |r| r.get(0))?;
    Ok(count as u64)
}

pub fn delete_document(conn: &Connection, id: u64) -> Result<()> {
    conn.execute("DELETE FROM chunks WHERE document_id = ?1", params![id])?;
    conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
    Ok(())
}

// --- chunks ------------------------------------------------------------

pub fn insert_chunk(
    conn: &Connection,
    document_id: u64,
    embedding_id: &str,
    content: &str,
    chunk_index: u32,
    content_type: ContentType,
    metadata: &Json,
) -> Result<u64> {
    conn.execute(
        "INSERT INTO chunks (document_id, embedding_id, content, chunk_index, content_type, metadata) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            document_id,
            embedding_id,
            content,
            chunk_index,
            content_type.as_str(),
            metadata.to_string()
        ],
    )?;
    Ok(conn.last_insert_rowid() as u64)
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
    let content_type: String = row.get(5)?;
    let metadata_str: String = row.get(6)?;
    Ok(Chunk {
        id: row.get::<_, i64>(0)? as u64,
        document_id: row.get::<_, i64>(1)? as u64,
        embedding_id: row.get(2)?,
        content: row.get(3)?,
        chunk_index: row.get::<_, i64>(4)? as u32,
        content_type: ContentType::parse(&content_type).unwrap_or(ContentType::Text),
        metadata: serde_json::from_str(&metadata_str).unwrap_or(Json::Object(Default::default())),
    })
}

const CHUNK_COLUMNS: &str =
    "id, document_id, embedding_id, content, chunk_index, content_type, metadata";

pub fn get_chunk_by_embedding_id(conn: &Connection, embedding_id: &str) -> Result<Option<Chunk>> {
    conn.query_row(
        &format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE embedding_id = ?1"),
        params![embedding_id],
        row_to_chunk,
    )
    .optional()
    .map_err(RagliteError::from)
}

pub fn get_chunks_by_embedding_ids(
    conn: &Connection,
    embedding_ids: &[String],
) -> Result<Vec<Chunk>> {
    let mut out = Vec::with_capacity(embedding_ids.len());
    for id in embedding_ids {
        if let Some(chunk) = get_chunk_by_embedding_id(conn, id)? {
            out.push(chunk);
        }
    }
    Ok(out)
}

/// Iterates all chunks in insertion order (`ORDER BY id`). Used by rebuild
/// (§4.9) and by the id-map cache warm-up on open; the order matters for
/// any dataset whose `id_map` table predates the id-map table (see
/// DESIGN.md open-question resolution).
pub fn all_chunks_ordered(conn: &Connection) -> Result<Vec<Chunk>> {
    let mut stmt = conn.prepare(&format!("SELECT {CHUNK_COLUMNS} FROM chunks ORDER BY id"))?;
    let rows = stmt.query_map([], row_to_chunk)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn count_chunks(conn: &Connection) -> Result<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))?;
    Ok(count as u64)
}

pub fn truncate_chunks(conn: &Connection) -> Result<()> {
    conn.execute_batch("DELETE FROM chunks; DELETE FROM id_map;")?;
    Ok(())
}

// --- system_info ---------------------------------------------------------

pub fn get_system_info(conn: &Connection) -> Result<Option<SystemInfo>> {
    conn.query_row(
        "SELECT mode, model_name, model_type, model_dimensions, supported_content_types, \
         reranking_strategy, model_version FROM system_info WHERE id = 1",
        [],
        |row| {
            let mode: String = row.get(0)?;
            let model_type: String = row.get(2)?;
            let types: String = row.get(4)?;
            let strategy: String = row.get(5)?;
            Ok(SystemInfo {
                mode: Mode::parse(&mode).unwrap_or(Mode::Text),
                model_name: row.get(1)?,
                model_type: ModelType::parse(&model_type).unwrap_or(ModelType::SentenceTransformer),
                model_dimensions: row.get::<_, i64>(3)? as u16,
                supported_content_types: parse_content_types(&types),
                reranking_strategy: RerankingStrategy::parse(&strategy)
                    .unwrap_or(RerankingStrategy::Disabled),
                model_version: row.get(6)?,
            })
        },
    )
    .optional()
    .map_err(RagliteError::from)
}

/// Writes the singleton with `INSERT OR REPLACE` (spec.md §4.8). Only the
/// rebuild path and the first-ingest path call this.
pub fn store_system_info(conn: &Connection, info: &SystemInfo) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO system_info \
         (id, mode, model_name, model_type, model_dimensions, supported_content_types, reranking_strategy, model_version) \
         VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            info.mode.as_str(),
            info.model_name,
            info.model_type.as_str(),
            info.model_dimensions,
            content_type_csv(&info.supported_content_types),
            info.reranking_strategy.as_str(),
            info.model_version
        ],
    )?;
    Ok(())
}

// --- content_blobs ---------------------------------------------------------

pub fn get_content_blob(conn: &Connection, content_id: &str) -> Result<Option<ContentBlob>> {
    conn.query_row(
        "SELECT content_id, byte_size, mime, on_disk_path FROM content_blobs WHERE content_id = ?1",
        params![content_id],
        |row| {
            Ok(ContentBlob {
                content_id: row.get(0)?,
                byte_size: row.get::<_, i64>(1)? as u64,
                mime: row.get(2)?,
                on_disk_path: row.get(3)?,
            })
        },
    )
    .optional()
    .map_err(RagliteError::from)
}

pub fn insert_content_blob_if_new(
    conn: &Connection,
    content_id: &str,
    byte_size: u64,
    mime: &str,
    on_disk_path: &str,
) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO content_blobs (content_id, byte_size, mime, on_disk_path, ref_count) \
         VALUES (?1, ?2, ?3, ?4, 0)",
        params![content_id, byte_size as i64, mime, on_disk_path],
    )?;
    Ok(())
}

pub fn ref_content_blob(conn: &Connection, content_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE content_blobs SET ref_count = ref_count + 1 WHERE content_id = ?1",
        params![content_id],
    )?;
    Ok(())
}

/// Decrements the refcount and reports whether it dropped to zero, in
/// which case the caller (the content store, C5) deletes the on-disk file.
pub fn unref_content_blob(conn: &Connection, content_id: &str) -> Result<bool> {
    conn.execute(
        "UPDATE content_blobs SET ref_count = ref_count - 1 WHERE content_id = ?1 AND ref_count > 0",
        params![content_id],
    )?;
    let remaining: i64 = conn.query_row(
        "SELECT ref_count FROM content_blobs WHERE content_id = ?1",
        params![content_id],
        |r| r.get(0),
    )?;
    Ok(remaining <= 0)
}

pub fn delete_content_blob(conn: &Connection, content_id: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM content_blobs WHERE content_id = ?1",
        params![content_id],
    )?;
    Ok(())
}

// --- id_map ---------------------------------------------------------------

pub fn insert_id_map_entry(conn: &Connection, embedding_id: &str, numeric_id: u32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO id_map (embedding_id, numeric_id) VALUES (?1, ?2)",
        params![embedding_id, numeric_id],
    )?;
    Ok(())
}

pub fn load_id_map(conn: &Connection) -> Result<Vec<(String, u32)>> {
    let mut stmt = conn.prepare("SELECT embedding_id, numeric_id FROM id_map")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u32))
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Clears the persisted id-map without touching `chunks` — used by a model
/// rebuild (spec.md §4.9 `rebuild_with`), which regenerates numeric ids for
/// the existing chunks but leaves the relational store otherwise untouched.
pub fn clear_id_map(conn: &Connection) -> Result<()> {
    conn.execute_batch("DELETE FROM id_map;")?;
    Ok(())
}
