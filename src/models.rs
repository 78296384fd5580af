use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Content type a chunk or document carries. Determines which embedder
/// branch handles it and which sub-index (§4.10) a query routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Image,
    Pdf,
    Docx,
    Markdown,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Image => "image",
            ContentType::Pdf => "pdf",
            ContentType::Docx => "docx",
            ContentType::Markdown => "markdown",
        }
    }

    pub fn parse(s: &str) -> Option<ContentType> {
        match s {
            "text" => Some(ContentType::Text),
            "image" => Some(ContentType::Image),
            "pdf" => Some(ContentType::Pdf),
            "docx" => Some(ContentType::Docx),
            "markdown" => Some(ContentType::Markdown),
            _ => None,
        }
    }
}

/// Dataset-wide mode: which embedder family and content-type set is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Text,
    Multimodal,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Text => "text",
            Mode::Multimodal => "multimodal",
        }
    }

    pub fn parse(s: &str) -> Option<Mode> {
        match s {
            "text" => Some(Mode::Text),
            "multimodal" => Some(Mode::Multimodal),
            _ => None,
        }
    }
}

/// The reranking policy baked into a dataset at creation time (§4.12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RerankingStrategy {
    CrossEncoder,
    TextDerived,
    Disabled,
}

impl RerankingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RerankingStrategy::CrossEncoder => "cross-encoder",
            RerankingStrategy::TextDerived => "text-derived",
            RerankingStrategy::Disabled => "disabled",
        }
    }

    pub fn parse(s: &str) -> Option<RerankingStrategy> {
        match s {
            "cross-encoder" => Some(RerankingStrategy::CrossEncoder),
            "text-derived" => Some(RerankingStrategy::TextDerived),
            "disabled" => Some(RerankingStrategy::Disabled),
            _ => None,
        }
    }
}

/// The embedder family behind a model entry (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelType {
    SentenceTransformer,
    Clip,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::SentenceTransformer => "sentence-transformer",
            ModelType::Clip => "clip",
        }
    }

    pub fn parse(s: &str) -> Option<ModelType> {
        match s {
            "sentence-transformer" => Some(ModelType::SentenceTransformer),
            "clip" => Some(ModelType::Clip),
            _ => None,
        }
    }
}

/// A document row (spec.md §3). Immutable after ingest except via delete +
/// re-ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: u64,
    pub source: String,
    pub title: String,
    pub content_type: ContentType,
    pub content_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A chunk row: one chunk, one vector, bridged by `embedding_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: u64,
    pub document_id: u64,
    pub embedding_id: String,
    pub content: String,
    pub chunk_index: u32,
    pub content_type: ContentType,
    pub metadata: Json,
}

/// The singleton row that fixes a dataset's identity (spec.md §3, §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub mode: Mode,
    pub model_name: String,
    pub model_type: ModelType,
    pub model_dimensions: u16,
    pub supported_content_types: Vec<ContentType>,
    pub reranking_strategy: RerankingStrategy,
    pub model_version: Option<String>,
}

/// A content-addressed blob row (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlob {
    pub content_id: String,
    pub byte_size: u64,
    pub mime: String,
    pub on_disk_path: String,
}

/// One retrieved document's worth of context returned from a search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: u64,
    pub source: String,
    pub title: String,
    pub content_type: ContentType,
    pub content_id: Option<String>,
}

/// A single search hit, assembled by the search pipeline (§4.14 step 5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub content: String,
    pub score: f32,
    pub content_type: ContentType,
    pub document: DocumentRef,
    pub metadata: Json,
}

/// Counters returned by an ingestion run (§4.13 step 6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestStats {
    pub documents_processed: u64,
    pub chunks_created: u64,
    pub embeddings_generated: u64,
    pub document_errors: u64,
    pub embedding_errors: u64,
    pub processing_time_ms: u64,
}

/// Dataset-wide statistics (Factory `stats()`, spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStats {
    pub total_chunks: u64,
    pub total_documents: u64,
    pub reranking_enabled: bool,
    pub mode: Mode,
    pub model_name: String,
    pub model_dimensions: u16,
    pub db_size: u64,
    pub index_size: u64,
}
