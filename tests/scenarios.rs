//! End-to-end scenarios against the public `Dataset` facade (spec.md §8).
//! Each test stands up a fresh dataset root under a tempdir and drives it
//! exactly as a caller embedding this crate would, through `Dataset::open`,
//! never reaching into the internal modules directly.

use std::path::Path;
use std::sync::Arc;

use raglite::embedder::{Embedder, FakeEmbedder};
use raglite::reranker::{DisabledReranker, Reranker};
use raglite::{ContentType, Dataset, IngestionOptions, RagliteError};

fn write(dir: &Path, name: &str, content: &str) {
    std::fs::write(dir.join(name), content).unwrap();
}

/// S1: a fresh dataset ingests two short documents and a query closer to one
/// of them ranks it first, ahead of the unrelated document.
#[tokio::test]
async fn s1_text_ingest_and_search_ranks_the_relevant_document_first() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "a.md", "Cats sleep a lot.");
    write(tmp.path(), "b.md", "Dogs chase balls.");

    let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder::minilm());
    let dataset = Dataset::open(tmp.path(), embedder, None).unwrap();
    dataset
        .ingestion
        .ingest_directory(tmp.path(), IngestionOptions::default())
        .await
        .unwrap();

    let results = dataset.search.search("feline naps", 2, None, false).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results[0].document.source.ends_with("a.md"));
    assert!(results[0].score > results[1].score);
    dataset.close().unwrap();
}

/// S2: an empty dataset answers any query with no results and reports zero
/// chunks, rather than erroring.
#[tokio::test]
async fn s2_empty_dataset_returns_no_results() {
    let tmp = tempfile::tempdir().unwrap();
    let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder::minilm());
    let dataset = Dataset::open(tmp.path(), embedder, None).unwrap();

    let results = dataset.search.search("anything", 5, None, false).await.unwrap();
    assert!(results.is_empty());

    let stats = dataset.stats().unwrap();
    assert_eq!(stats.total_chunks, 0);
    dataset.close().unwrap();
}

/// S3: reopening a dataset with a different model than it was created under
/// is rejected before any index bytes are touched, and the error names both
/// models and both dimensionalities.
#[tokio::test]
async fn s3_reopening_with_a_different_model_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "a.md", "Cats sleep a lot.");

    let minilm: Arc<dyn Embedder> = Arc::new(FakeEmbedder::minilm());
    let dataset = Dataset::open(tmp.path(), minilm, None).unwrap();
    dataset
        .ingestion
        .ingest_directory(tmp.path(), IngestionOptions::default())
        .await
        .unwrap();
    dataset.close().unwrap();

    let mpnet: Arc<dyn Embedder> = Arc::new(FakeEmbedder::mpnet());
    let err = Dataset::open(tmp.path(), mpnet, None).unwrap_err();
    match err {
        RagliteError::ModelIncompatible {
            stored_model,
            stored_dims,
            requested_model,
            requested_dims,
        } => {
            assert_eq!(stored_model, "MiniLM-L6-v2");
            assert_eq!(stored_dims, 384);
            assert_eq!(requested_model, "mpnet-base-v2");
            assert_eq!(requested_dims, 768);
        }
        other => panic!("expected ModelIncompatible, got {other:?}"),
    }
}

/// S4: continuing from the mismatch in S3, `rebuild` re-embeds the existing
/// chunks under the new model in place and search keeps working.
#[tokio::test]
async fn s4_rebuild_switches_model_and_keeps_results_searchable() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "a.md", "Cats sleep a lot.");
    write(tmp.path(), "b.md", "Dogs chase balls.");

    let minilm: Arc<dyn Embedder> = Arc::new(FakeEmbedder::minilm());
    let dataset = Dataset::open(tmp.path(), minilm, None).unwrap();
    dataset
        .ingestion
        .ingest_directory(tmp.path(), IngestionOptions::default())
        .await
        .unwrap();
    let before = dataset.stats().unwrap();

    let mpnet: Arc<dyn Embedder> = Arc::new(FakeEmbedder::mpnet());
    let dataset = dataset.rebuild(mpnet, None).await.unwrap();

    let after = dataset.stats().unwrap();
    assert_eq!(after.model_name, "mpnet-base-v2");
    assert_eq!(after.model_dimensions, 768);
    assert_eq!(after.total_chunks, before.total_chunks);
    assert_eq!(after.total_documents, before.total_documents);

    let results = dataset.search.search("feline naps", 2, None, false).await.unwrap();
    assert!(!results.is_empty());
    assert!(results[0].document.source.ends_with("a.md"));
    dataset.close().unwrap();
}

/// S5: a multimodal (CLIP) dataset routes a text query to the image sub-graph
/// and a text sub-graph independently, per the requested content type.
#[tokio::test]
async fn s5_multimodal_dataset_routes_by_content_type() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "vehicles.md", "An overview of red sports cars and vehicles.");
    write(tmp.path(), "red-car.jpg", "placeholder bytes, embedded from filename");

    let clip: Arc<dyn Embedder> = Arc::new(FakeEmbedder::clip());
    let dataset = Dataset::open(tmp.path(), clip, None).unwrap();
    dataset
        .ingestion
        .ingest_directory(tmp.path(), IngestionOptions::default())
        .await
        .unwrap();

    let image_results = dataset
        .search
        .search("red sports car", 1, Some(ContentType::Image), false)
        .await
        .unwrap();
    assert_eq!(image_results.len(), 1);
    assert_eq!(image_results[0].content_type, ContentType::Image);
    assert!(image_results[0].document.source.ends_with("red-car.jpg"));

    let text_results = dataset
        .search
        .search("red sports car", 1, Some(ContentType::Text), false)
        .await
        .unwrap();
    assert_eq!(text_results.len(), 1);
    assert_eq!(text_results[0].content_type, ContentType::Markdown);
    assert!(text_results[0].document.source.ends_with("vehicles.md"));
    dataset.close().unwrap();
}

/// S6: force-rebuilding a dataset while a concurrent reader is mid-search
/// against the same handle succeeds, and any reader call either completes
/// cleanly or surfaces a recognized error — never a panic or torn state.
/// Both share the dataset's connection and index (spec.md §2: "one ingestion
/// pipeline and one search engine sharing the same connection, index and
/// content store"), so the writer's file swap is visible to the reader the
/// instant it completes.
#[tokio::test]
async fn s6_force_rebuild_under_a_concurrent_reader_leaves_a_consistent_dataset() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "a.md", "Cats sleep a lot.");

    let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder::minilm());
    let dataset = Dataset::open(tmp.path(), embedder, None).unwrap();
    dataset
        .ingestion
        .ingest_directory(tmp.path(), IngestionOptions::default())
        .await
        .unwrap();

    write(tmp.path(), "c.md", "Lizards bask in the sun.");
    let reader = dataset.search.search("feline naps", 5, None, false);
    let writer = dataset.ingestion.ingest_directory(
        tmp.path(),
        IngestionOptions {
            force_rebuild: true,
            ..Default::default()
        },
    );
    let (reader_outcome, writer_outcome) = tokio::join!(reader, writer);

    assert!(
        matches!(reader_outcome, Ok(_) | Err(RagliteError::Busy(_)) | Err(RagliteError::Database(_))),
        "reader saw an unexpected error: {reader_outcome:?}"
    );
    let writer_stats = writer_outcome.unwrap();
    assert_eq!(writer_stats.documents_processed, 2);

    let stats = dataset.stats().unwrap();
    assert_eq!(stats.total_documents, 2);
    let results = dataset.search.search("feline naps", 5, None, false).await.unwrap();
    assert!(!results.is_empty());
    assert!(results[0].document.source.ends_with("a.md"));
    dataset.close().unwrap();
}

/// A basic sanity check that the reranker surface is reachable through the
/// public API, not just exercised internally (spec.md §4.12).
#[tokio::test]
async fn disabled_reranker_is_the_default_when_none_is_supplied() {
    let tmp = tempfile::tempdir().unwrap();
    write(tmp.path(), "a.md", "Cats sleep a lot.");

    let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder::minilm());
    let reranker: Option<Arc<dyn Reranker>> = None;
    let dataset = Dataset::open(tmp.path(), embedder, reranker).unwrap();
    dataset
        .ingestion
        .ingest_directory(tmp.path(), IngestionOptions::default())
        .await
        .unwrap();
    let stats = dataset.stats().unwrap();
    assert!(!stats.reranking_enabled);
    dataset.close().unwrap();

    // DisabledReranker is usable directly too, for callers that want to be explicit.
    let _explicit: Arc<dyn Reranker> = Arc::new(DisabledReranker);
}
