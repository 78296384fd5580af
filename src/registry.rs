use crate::error::{RagliteError, Result};
use crate::models::{ContentType, ModelType, RerankingStrategy};

/// A catalog entry for one supported embedder (spec.md §4.7).
#[derive(Debug, Clone)]
pub struct ModelEntry {
    pub name: &'static str,
    pub model_type: ModelType,
    pub dimensions: u16,
    pub supported_content_types: &'static [ContentType],
    pub max_text_length: u32,
    pub required_features: &'static [&'static str],
    pub min_memory_mib: u32,
    pub default_reranking_strategy: RerankingStrategy,
    pub supported_image_formats: &'static [&'static str],
}

impl ModelEntry {
    pub fn is_cross_modal(&self) -> bool {
        matches!(self.model_type, ModelType::Clip)
    }
}

const NO_IMAGE_FORMATS: &[&str] = &[];
const CLIP_IMAGE_FORMATS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];

/// Minimum required catalog (spec.md §4.7).
pub const CATALOG: &[ModelEntry] = &[
    ModelEntry {
        name: "MiniLM-L6-v2",
        model_type: ModelType::SentenceTransformer,
        dimensions: 384,
        supported_content_types: &[ContentType::Text, ContentType::Markdown, ContentType::Pdf, ContentType::Docx],
        max_text_length: 512,
        required_features: &[],
        min_memory_mib: 256,
        default_reranking_strategy: RerankingStrategy::CrossEncoder,
        supported_image_formats: NO_IMAGE_FORMATS,
    },
    ModelEntry {
        name: "mpnet-base-v2",
        model_type: ModelType::SentenceTransformer,
        dimensions: 768,
        supported_content_types: &[ContentType::Text, ContentType::Markdown, ContentType::Pdf, ContentType::Docx],
        max_text_length: 512,
        required_features: &[],
        min_memory_mib: 512,
        default_reranking_strategy: RerankingStrategy::CrossEncoder,
        supported_image_formats: NO_IMAGE_FORMATS,
    },
    ModelEntry {
        name: "clip-vit-base-patch32",
        model_type: ModelType::Clip,
        dimensions: 512,
        supported_content_types: &[ContentType::Text, ContentType::Image, ContentType::Markdown],
        max_text_length: 77,
        required_features: &["cross-modal"],
        min_memory_mib: 600,
        default_reranking_strategy: RerankingStrategy::TextDerived,
        supported_image_formats: CLIP_IMAGE_FORMATS,
    },
    ModelEntry {
        name: "clip-vit-base-patch16",
        model_type: ModelType::Clip,
        dimensions: 512,
        supported_content_types: &[ContentType::Text, ContentType::Image, ContentType::Markdown],
        max_text_length: 77,
        required_features: &["cross-modal"],
        min_memory_mib: 1200,
        default_reranking_strategy: RerankingStrategy::TextDerived,
        supported_image_formats: CLIP_IMAGE_FORMATS,
    },
];

/// Looks up a model by name, or fails with `ModelUnsupported` listing the
/// catalog (spec.md §4.7).
pub fn lookup(name: &str) -> Result<&'static ModelEntry> {
    CATALOG
        .iter()
        .find(|m| m.name == name)
        .ok_or_else(|| {
            let names: Vec<&str> = CATALOG.iter().map(|m| m.name).collect();
            RagliteError::ModelUnsupported(name.to_string(), names.join(", "))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_model() {
        let entry = lookup("MiniLM-L6-v2").unwrap();
        assert_eq!(entry.dimensions, 384);
    }

    #[test]
    fn lookup_unknown_model_lists_catalog() {
        let err = lookup("not-a-model").unwrap_err();
        match err {
            RagliteError::ModelUnsupported(name, list) => {
                assert_eq!(name, "not-a-model");
                assert!(list.contains("MiniLM-L6-v2"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn clip_entries_are_cross_modal() {
        let entry = lookup("clip-vit-base-patch32").unwrap();
        assert!(entry.is_cross_modal());
        let entry = lookup("MiniLM-L6-v2").unwrap();
        assert!(!entry.is_cross_modal());
    }
}
