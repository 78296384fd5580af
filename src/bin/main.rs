use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use raglite::config::Config;
use raglite::embedder::{Embedder, FakeEmbedder};
use raglite::error::RagliteError;
use raglite::factory::Dataset;
use raglite::ingestion::IngestionOptions;
use raglite::reranker::{DisabledReranker, FakeReranker, Reranker};
use raglite::{registry, ContentType, RerankingStrategy};

#[derive(Parser)]
#[command(name = "raglite-cli")]
#[command(about = "Local retrieval engine: ingest files, search them, switch models")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a directory of documents into a dataset.
    Ingest {
        /// Dataset root (holds `.raglite/`); defaults to the current directory.
        #[arg(long)]
        root: Option<PathBuf>,
        /// Directory to walk for supported files; defaults to `root`.
        #[arg(long)]
        source: Option<PathBuf>,
        /// Embedding model name from the catalog (only valid on `ingest`).
        #[arg(long, default_value = "MiniLM-L6-v2")]
        model: String,
        #[arg(long)]
        chunk_size: Option<usize>,
        #[arg(long)]
        chunk_overlap: Option<usize>,
        /// Wipe the dataset before ingesting instead of adding to it.
        #[arg(long)]
        force_rebuild: bool,
        #[arg(long)]
        rerank: bool,
    },
    /// Run a query against an existing dataset.
    Search {
        #[arg(long)]
        root: Option<PathBuf>,
        query: String,
        #[arg(long, default_value_t = 10)]
        top_k: usize,
        #[arg(long)]
        content_type: Option<String>,
        #[arg(long)]
        rerank: bool,
    },
    /// Re-embed every chunk under a different model.
    Rebuild {
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        model: String,
        #[arg(long)]
        rerank: bool,
    },
    /// Interactive browser UI (not available in this build).
    Ui {
        #[arg(long)]
        root: Option<PathBuf>,
    },
}

fn default_root() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
}

fn build_embedder(model: &str) -> Result<Arc<dyn Embedder>> {
    let entry = registry::lookup(model).context("unknown --model")?;
    Ok(Arc::new(FakeEmbedder::from_entry(entry)))
}

fn build_reranker(model: &str, enabled: bool) -> Result<Option<Arc<dyn Reranker>>> {
    if !enabled {
        return Ok(Some(Arc::new(DisabledReranker)));
    }
    let entry = registry::lookup(model).context("unknown --model")?;
    if entry.default_reranking_strategy == RerankingStrategy::Disabled {
        return Ok(Some(Arc::new(DisabledReranker)));
    }
    Ok(Some(Arc::new(FakeReranker::new(entry.default_reranking_strategy))))
}

fn parse_content_type(raw: &str) -> Result<ContentType> {
    ContentType::parse(raw).ok_or_else(|| anyhow::anyhow!("unrecognized content type: {raw}"))
}

/// Finds out which model a dataset at `root` is already using, without
/// committing to an embedder first: `Dataset::open` enforces compatibility
/// before touching index bytes (spec.md §4.9), so probing with an arbitrary
/// embedder either succeeds outright (that embedder was already correct, or
/// the dataset has never been ingested into) or fails with
/// `ModelIncompatible`, which names the real stored model.
fn detect_current_model(root: &std::path::Path) -> Result<String> {
    match Dataset::open(root, Arc::new(FakeEmbedder::minilm()), None) {
        Ok(dataset) => {
            let stats = dataset.stats()?;
            dataset.close()?;
            Ok(stats.model_name)
        }
        Err(RagliteError::ModelIncompatible { stored_model, .. }) => Ok(stored_model),
        Err(e) => Err(e.into()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("loading RAG_* environment configuration")?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest {
            root,
            source,
            model,
            chunk_size,
            chunk_overlap,
            force_rebuild,
            rerank,
        } => {
            let root = root.unwrap_or_else(default_root);
            let source = source.unwrap_or_else(|| root.clone());
            let embedder = build_embedder(&model)?;
            let reranker = build_reranker(&model, rerank || config.rerank_enabled)?;
            let dataset = Dataset::open(&root, embedder, reranker)?;
            let options = IngestionOptions {
                chunk_size: chunk_size.or(config.chunk_size),
                chunk_overlap: chunk_overlap.or(config.chunk_overlap),
                force_rebuild,
            };
            let stats = dataset.ingestion.ingest_directory(&source, options).await?;
            println!(
                "ingested {} documents, {} chunks ({} document errors, {} embedding errors) in {}ms",
                stats.documents_processed,
                stats.chunks_created,
                stats.document_errors,
                stats.embedding_errors,
                stats.processing_time_ms
            );
            dataset.close()?;
        }

        Commands::Search {
            root,
            query,
            top_k,
            content_type,
            rerank,
        } => {
            let root = root.unwrap_or_else(default_root);
            let current_model = detect_current_model(&root)?;
            let embedder = build_embedder(&current_model)?;
            let reranker = build_reranker(&current_model, rerank)?;
            let dataset = Dataset::open(&root, embedder, reranker)?;
            let content_type = content_type.as_deref().map(parse_content_type).transpose()?;
            let results = dataset
                .search
                .search(&query, top_k, content_type, rerank)
                .await?;
            if results.is_empty() {
                println!("no results");
            }
            for (rank, result) in results.iter().enumerate() {
                println!(
                    "{}. [{:.4}] {} ({})\n    {}",
                    rank + 1,
                    result.score,
                    result.document.source,
                    result.content_type.as_str(),
                    result.content.chars().take(160).collect::<String>()
                );
            }
            dataset.close()?;
        }

        Commands::Rebuild { root, model, rerank } => {
            let root = root.unwrap_or_else(default_root);
            let current_model = detect_current_model(&root)?;
            let current_embedder = build_embedder(&current_model)?;
            let dataset = Dataset::open(&root, current_embedder, None)?;

            let new_embedder = build_embedder(&model)?;
            let new_reranker = build_reranker(&model, rerank)?;
            let dataset = dataset.rebuild(new_embedder, new_reranker).await?;
            let stats = dataset.stats()?;
            println!(
                "rebuilt dataset under '{}' ({}-d, {} documents, {} chunks)",
                stats.model_name, stats.model_dimensions, stats.total_documents, stats.total_chunks
            );
            dataset.close()?;
        }

        Commands::Ui { root } => {
            let root = root.unwrap_or_else(default_root);
            if !root.exists() {
                bail!("dataset root does not exist: {}", root.display());
            }
            eprintln!("interactive browser UI is not available in this build");
        }
    }

    Ok(())
}
