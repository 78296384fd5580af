//! Embeddable local retrieval engine: an HNSW vector index paired with a
//! SQLite metadata store, wired together by the [`factory`] module into a
//! single `Dataset` handle per process (spec.md §2).
//!
//! Module layout mirrors the component design: [`paths`]/[`config`] are the
//! ambient layer, [`db`]/[`content_store`]/[`connection`] are the
//! relational/blob/connection-pooling components, [`index`] is the vector
//! side (binary format, id-map, HNSW wrapper, dual-graph routing),
//! [`chunker`]/[`mode`]/[`registry`] are the ingestion-support components,
//! [`embedder`]/[`reranker`] are the pluggable model contracts, and
//! [`ingestion`]/[`search`] are the two pipelines the [`factory::Dataset`]
//! exposes.

pub mod chunker;
pub mod config;
pub mod connection;
pub mod content_store;
pub mod db;
pub mod embedder;
pub mod error;
pub mod factory;
pub mod index;
pub mod ingestion;
pub mod mode;
pub mod models;
pub mod paths;
pub mod registry;
pub mod reranker;
pub mod search;

pub use error::{RagliteError, Result};
pub use factory::Dataset;
pub use ingestion::IngestionOptions;
pub use models::{
    ContentBlob, ContentType, DatasetStats, Document, DocumentRef, IngestStats, Mode, ModelType,
    RerankingStrategy, SearchResult, SystemInfo,
};
pub use registry::{lookup as lookup_model, ModelEntry, CATALOG};
