//! Embedder interface (C10): the contract the core consumes, never the
//! model weights or inference runtime behind it (spec.md §1 Non-goals).
//!
//! The core accepts an embedder handle already loaded by a builder
//! (spec.md §9 "lazy loading of heavy model dependencies"); this crate
//! never itself pulls in a tokenizer/inference runtime, so a text-only
//! dataset never touches image pipelines.

use crate::error::{RagliteError, Result};
use crate::models::ContentType;

/// Capabilities advertised by an embedder (spec.md §4.11).
#[derive(Debug, Clone)]
pub struct EmbedderCapabilities {
    pub name: String,
    pub model_type: crate::models::ModelType,
    pub dimensions: u16,
    pub supported_content_types: Vec<ContentType>,
    pub max_text_length: u32,
    pub max_batch_size: usize,
}

/// One embedded item: the bridge id and its vector.
#[derive(Debug, Clone)]
pub struct EmbeddedItem {
    pub embedding_id: String,
    pub vector: Vec<f32>,
}

/// An item submitted to [`Embedder::embed_batch`]. The embedder assigns the
/// returned `embedding_id` itself (spec.md §6 external contract); callers
/// never pre-seed it.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub content: String,
    pub content_type: ContentType,
}

/// The embedder contract (spec.md §4.11, §6 "Embedder contract (external)").
///
/// Implementations are expected to be internally thread-safe for concurrent
/// `embed_text` calls up to `max_batch_size` (spec.md §5); the core never
/// mutates their internal state and treats every call as synchronous and
/// CPU/IO-bound, to be scheduled by the caller (spec.md §4.11, §5).
pub trait Embedder: Send + Sync {
    fn capabilities(&self) -> &EmbedderCapabilities;

    /// Rejects empty/whitespace-only input with `Validation`. Deterministic
    /// under identical input and model version (spec.md §4.11 invariant).
    fn embed_text(&self, text: &str) -> Result<EmbeddedItem>;

    /// Present only on multimodal embedders; the default implementation
    /// reports `ModelLoadFailed` so text-only embedders need not implement
    /// it. CLIP-family embedders override this.
    fn embed_image(&self, _path: &std::path::Path) -> Result<EmbeddedItem> {
        Err(RagliteError::ModelLoadFailed(format!(
            "{} does not support image embedding",
            self.capabilities().name
        )))
    }

    /// Filters out items whose content type this embedder does not support,
    /// then embeds the remainder, returning results in input order for the
    /// processed subset (spec.md §4.11). Per-item embedding failures are
    /// reported as `EmbeddingError` entries so the caller can count them
    /// without aborting the batch (spec.md §4.13 step 4).
    fn embed_batch(&self, items: &[BatchItem]) -> Vec<Result<EmbeddedItem>> {
        let supported = &self.capabilities().supported_content_types;
        items
            .iter()
            .filter(|item| supported.contains(&item.content_type))
            .map(|item| self.embed_text(&item.content))
            .collect()
    }

    fn load(&mut self) -> Result<()> {
        Ok(())
    }

    fn unload(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        true
    }
}

/// A deterministic test double for the pipeline tests (spec.md §1's
/// "deliberately out of scope" boundary for model runtimes — see
/// SPEC_FULL.md §4.19). Produces a stable vector per input string by
/// hashing its bytes into a fixed-dimension pseudo-embedding; identical
/// text always yields an identical vector.
pub struct FakeEmbedder {
    caps: EmbedderCapabilities,
}

impl FakeEmbedder {
    pub fn new(name: &str, dimensions: u16, supported: Vec<ContentType>) -> FakeEmbedder {
        FakeEmbedder {
            caps: EmbedderCapabilities {
                name: name.to_string(),
                model_type: crate::models::ModelType::SentenceTransformer,
                dimensions,
                supported_content_types: supported,
                max_text_length: 512,
                max_batch_size: 32,
            },
        }
    }

    pub fn minilm() -> FakeEmbedder {
        FakeEmbedder::new(
            "MiniLM-L6-v2",
            384,
            vec![
                ContentType::Text,
                ContentType::Markdown,
                ContentType::Pdf,
                ContentType::Docx,
            ],
        )
    }

    pub fn mpnet() -> FakeEmbedder {
        FakeEmbedder::new(
            "mpnet-base-v2",
            768,
            vec![
                ContentType::Text,
                ContentType::Markdown,
                ContentType::Pdf,
                ContentType::Docx,
            ],
        )
    }

    pub fn clip() -> FakeEmbedder {
        let mut embedder = FakeEmbedder::new(
            "clip-vit-base-patch32",
            512,
            vec![ContentType::Text, ContentType::Image, ContentType::Markdown],
        );
        embedder.caps.model_type = crate::models::ModelType::Clip;
        embedder
    }

    /// Builds a fake embedder standing in for whichever catalog entry the
    /// caller picked (spec.md §1 "deliberately out of scope" boundary for
    /// real model runtimes — see SPEC_FULL.md §4.19). Used by the CLI, which
    /// has no inference runtime to load but still needs to honor `--model`.
    pub fn from_entry(entry: &crate::registry::ModelEntry) -> FakeEmbedder {
        let mut embedder = FakeEmbedder::new(
            entry.name,
            entry.dimensions,
            entry.supported_content_types.to_vec(),
        );
        embedder.caps.model_type = entry.model_type;
        embedder.caps.max_text_length = entry.max_text_length;
        embedder
    }

    /// Deterministic bag-of-words hash vector, biased toward a small set of
    /// topic "axes" so tests can assert relative ranking (e.g. a query
    /// about cats scores closer to cat content than dog content) without a
    /// real embedding model.
    fn pseudo_embed(&self, text: &str) -> Vec<f32> {
        let dims = self.caps.dimensions as usize;
        let mut vector = vec![0.0f32; dims];
        for word in text.to_lowercase().split_whitespace() {
            let mut hash: u64 = 1469598103934665603;
            for b in word.as_bytes() {
                hash ^= *b as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let slot = (hash as usize) % dims;
            vector[slot] += 1.0;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        vector
    }
}

impl Embedder for FakeEmbedder {
    fn capabilities(&self) -> &EmbedderCapabilities {
        &self.caps
    }

    fn embed_text(&self, text: &str) -> Result<EmbeddedItem> {
        if text.trim().is_empty() {
            return Err(RagliteError::Validation(
                "embed_text: input is empty or whitespace-only".to_string(),
            ));
        }
        Ok(EmbeddedItem {
            embedding_id: uuid::Uuid::new_v4().to_string(),
            vector: self.pseudo_embed(text),
        })
    }

    fn embed_image(&self, path: &std::path::Path) -> Result<EmbeddedItem> {
        if self.caps.model_type != crate::models::ModelType::Clip {
            return Err(RagliteError::ModelLoadFailed(format!(
                "{} does not support image embedding",
                self.caps.name
            )));
        }
        let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("image");
        Ok(EmbeddedItem {
            embedding_id: uuid::Uuid::new_v4().to_string(),
            vector: self.pseudo_embed(name),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_text_rejects_empty_input() {
        let embedder = FakeEmbedder::minilm();
        assert!(matches!(
            embedder.embed_text("   ").unwrap_err(),
            RagliteError::Validation(_)
        ));
    }

    #[test]
    fn embed_text_is_deterministic() {
        let embedder = FakeEmbedder::minilm();
        let a = embedder.embed_text("cats sleep a lot").unwrap();
        let b = embedder.embed_text("cats sleep a lot").unwrap();
        assert_eq!(a.vector, b.vector);
        assert_eq!(a.vector.len(), 384);
    }

    #[test]
    fn from_entry_matches_catalog_dimensions_and_type() {
        let entry = crate::registry::lookup("clip-vit-base-patch16").unwrap();
        let embedder = FakeEmbedder::from_entry(entry);
        assert_eq!(embedder.capabilities().dimensions, 512);
        assert_eq!(embedder.capabilities().model_type, crate::models::ModelType::Clip);
    }

    #[test]
    fn embed_batch_filters_unsupported_content_types() {
        let embedder = FakeEmbedder::minilm();
        let items = vec![
            BatchItem {
                content: "hello".into(),
                content_type: ContentType::Text,
            },
            BatchItem {
                content: "irrelevant".into(),
                content_type: ContentType::Image,
            },
        ];
        let results = embedder.embed_batch(&items);
        assert_eq!(results.len(), 1);
    }
}
