//! Mode/model compatibility subsystem (C8): reads/writes the `system_info`
//! singleton and decides the effective mode at open time.

use rusqlite::Connection;

use crate::db;
use crate::error::Result;
use crate::models::{Mode, ModelType, SystemInfo};
use crate::registry;

/// Default mode materialized only on first ingest (spec.md §4.8), never on
/// a read of a missing dataset — `open` for a dataset that hasn't been
/// ingested into yet stays read-only.
pub fn default_system_info() -> SystemInfo {
    let entry = registry::lookup("MiniLM-L6-v2").expect("MiniLM-L6-v2 is always in the catalog");
    SystemInfo {
        mode: Mode::Text,
        model_name: entry.name.to_string(),
        model_type: ModelType::SentenceTransformer,
        model_dimensions: entry.dimensions,
        supported_content_types: entry.supported_content_types.to_vec(),
        reranking_strategy: entry.default_reranking_strategy,
        model_version: None,
    }
}

/// Reads `system_info`; returns the text/MiniLM default in-memory (without
/// writing it) when the table is empty.
pub fn detect(conn: &Connection) -> Result<SystemInfo> {
    match db::get_system_info(conn)? {
        Some(info) => Ok(info),
        None => Ok(default_system_info()),
    }
}

/// Returns whether a `system_info` row exists yet — the thing that
/// distinguishes "dataset has never been ingested into" from "dataset
/// uses the default model by choice".
pub fn is_materialized(conn: &Connection) -> Result<bool> {
    Ok(db::get_system_info(conn)?.is_some())
}

pub fn store(conn: &Connection, info: &SystemInfo) -> Result<()> {
    db::store_system_info(conn, info)
}

/// Builds a fresh `SystemInfo` for `model_name`, using the registry's
/// defaults for type/dimensions/content-types/reranking strategy, with
/// `mode` derived from whether the model is cross-modal.
pub fn system_info_for_model(model_name: &str) -> Result<SystemInfo> {
    let entry = registry::lookup(model_name)?;
    Ok(SystemInfo {
        mode: if entry.is_cross_modal() {
            Mode::Multimodal
        } else {
            Mode::Text
        },
        model_name: entry.name.to_string(),
        model_type: entry.model_type,
        model_dimensions: entry.dimensions,
        supported_content_types: entry.supported_content_types.to_vec(),
        reranking_strategy: entry.default_reranking_strategy,
        model_version: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ensure_schema;

    #[test]
    fn detect_returns_default_without_writing() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        let info = detect(&conn).unwrap();
        assert_eq!(info.model_name, "MiniLM-L6-v2");
        assert!(!is_materialized(&conn).unwrap());
    }

    #[test]
    fn store_materializes_singleton() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        let info = system_info_for_model("clip-vit-base-patch32").unwrap();
        store(&conn, &info).unwrap();
        assert!(is_materialized(&conn).unwrap());
        let stored = detect(&conn).unwrap();
        assert_eq!(stored.mode, Mode::Multimodal);
    }
}
