/// Schema DDL, split from the teacher's single `CREATE_DB_SQL` constant into
/// one statement per table so the migration step (`ensure_schema`) can test
/// for each table's existence independently.
pub const CREATE_DOCUMENTS: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    title TEXT NOT NULL,
    content_type TEXT NOT NULL,
    content_id TEXT,
    created_at INTEGER NOT NULL
);
"#;

pub const CREATE_CHUNKS: &str = r#"
CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id INTEGER NOT NULL REFERENCES documents(id),
    embedding_id TEXT NOT NULL UNIQUE,
    content TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    content_type TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_chunks_embedding_id ON chunks(embedding_id);
CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id);
"#;

pub const CREATE_SYSTEM_INFO: &str = r#"
CREATE TABLE IF NOT EXISTS system_info (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    mode TEXT NOT NULL,
    model_name TEXT NOT NULL,
    model_type TEXT NOT NULL,
    model_dimensions INTEGER NOT NULL,
    supported_content_types TEXT NOT NULL,
    reranking_strategy TEXT NOT NULL,
    model_version TEXT
);
"#;

pub const CREATE_CONTENT_BLOBS: &str = r#"
CREATE TABLE IF NOT EXISTS content_blobs (
    content_id TEXT PRIMARY KEY,
    byte_size INTEGER NOT NULL,
    mime TEXT NOT NULL,
    on_disk_path TEXT NOT NULL,
    ref_count INTEGER NOT NULL DEFAULT 0
);
"#;

/// `id_map` is the deviation from spec.md §9's recommended design: the
/// `embedding_id <-> numeric_id` bijection is persisted instead of being
/// re-derived purely from `ORDER BY id` replay on every open.
pub const CREATE_ID_MAP: &str = r#"
CREATE TABLE IF NOT EXISTS id_map (
    embedding_id TEXT PRIMARY KEY,
    numeric_id INTEGER NOT NULL UNIQUE
);
"#;

pub const ALL_TABLES: &[&str] = &[
    CREATE_DOCUMENTS,
    CREATE_CHUNKS,
    CREATE_SYSTEM_INFO,
    CREATE_CONTENT_BLOBS,
    CREATE_ID_MAP,
];
