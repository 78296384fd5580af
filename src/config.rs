//! Configuration (ambient, SPEC_FULL.md §4.18): the environment variables
//! of spec.md §6, loaded with `std::env::var` plus `.parse()`. A numeric or
//! boolean parse failure is a `RagliteError::Validation`, never a silent
//! fallback to the default — mirroring the teacher's preference for
//! explicit errors over swallowed ones.

use std::path::PathBuf;

use crate::error::{RagliteError, Result};

/// Default chunk size/overlap used only when neither a model-specific
/// default (`chunker::default_chunk_params`) nor an explicit override
/// applies.
pub const DEFAULT_CHUNK_SIZE: usize = 250;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;
pub const DEFAULT_BATCH_SIZE: usize = 32;
pub const DEFAULT_TOP_K: usize = 10;

/// Process-wide configuration assembled from environment variables with
/// built-in fallbacks (spec.md §6).
#[derive(Debug, Clone)]
pub struct Config {
    pub db_file: Option<PathBuf>,
    pub index_file: Option<PathBuf>,
    pub embedding_model: Option<String>,
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub batch_size: usize,
    pub top_k: usize,
    pub rerank_enabled: bool,
    pub model_cache_path: Option<PathBuf>,
    pub cli_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_file: None,
            index_file: None,
            embedding_model: None,
            chunk_size: None,
            chunk_overlap: None,
            batch_size: DEFAULT_BATCH_SIZE,
            top_k: DEFAULT_TOP_K,
            rerank_enabled: false,
            model_cache_path: None,
            cli_mode: false,
        }
    }
}

fn parse_env_usize(key: &str) -> Result<Option<usize>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<usize>()
            .map(Some)
            .map_err(|e| RagliteError::Validation(format!("{key}={raw:?} is not a valid integer: {e}"))),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(RagliteError::Validation(format!(
            "{key} is not valid unicode"
        ))),
    }
}

fn parse_env_bool(key: &str, default: bool) -> Result<bool> {
    match std::env::var(key) {
        Ok(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(RagliteError::Validation(format!(
                "{key}={raw:?} is not a valid boolean"
            ))),
        },
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(std::env::VarError::NotUnicode(_)) => Err(RagliteError::Validation(format!(
            "{key} is not valid unicode"
        ))),
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().map(PathBuf::from)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

impl Config {
    /// Loads from the process environment; CLI flags layered on top by the
    /// caller override individual fields after this returns (§6).
    pub fn from_env() -> Result<Config> {
        Ok(Config {
            db_file: env_path("RAG_DB_FILE"),
            index_file: env_path("RAG_INDEX_FILE"),
            embedding_model: env_string("RAG_EMBEDDING_MODEL"),
            chunk_size: parse_env_usize("RAG_CHUNK_SIZE")?,
            chunk_overlap: parse_env_usize("RAG_CHUNK_OVERLAP")?,
            batch_size: parse_env_usize("RAG_BATCH_SIZE")?.unwrap_or(DEFAULT_BATCH_SIZE),
            top_k: parse_env_usize("RAG_TOP_K")?.unwrap_or(DEFAULT_TOP_K),
            rerank_enabled: parse_env_bool("RAG_RERANK_ENABLED", false)?,
            model_cache_path: env_path("RAG_MODEL_CACHE_PATH"),
            cli_mode: parse_env_bool("RAG_CLI_MODE", false)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch
    // them so they don't race each other.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        for key in ["RAG_CHUNK_SIZE", "RAG_BATCH_SIZE", "RAG_TOP_K", "RAG_RERANK_ENABLED"] {
            std::env::remove_var(key);
        }
        let config = Config::from_env().unwrap();
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.top_k, DEFAULT_TOP_K);
        assert!(!config.rerank_enabled);
    }

    #[test]
    fn invalid_numeric_env_is_a_validation_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("RAG_CHUNK_SIZE", "not-a-number");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, RagliteError::Validation(_)));
        std::env::remove_var("RAG_CHUNK_SIZE");
    }

    #[test]
    fn invalid_bool_env_is_a_validation_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("RAG_RERANK_ENABLED", "maybe");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, RagliteError::Validation(_)));
        std::env::remove_var("RAG_RERANK_ENABLED");
    }
}
