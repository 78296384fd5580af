//! Content-addressed blob storage under `<root>/content/` (C5).

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use sha2::{Digest, Sha256};

use crate::db;
use crate::error::{classify_io_error, Result};

#[derive(Clone)]
pub struct ContentStore {
    content_dir: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

fn ext_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" => ".jpg",
        "image/png" => ".png",
        "image/webp" => ".webp",
        "image/gif" => ".gif",
        "application/pdf" => ".pdf",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => ".docx",
        "text/markdown" => ".md",
        _ => ".bin",
    }
}

impl ContentStore {
    pub fn new(content_dir: PathBuf, conn: Arc<Mutex<Connection>>) -> ContentStore {
        ContentStore { content_dir, conn }
    }

    /// Hashes `bytes`, writes to a temp file then renames, and inserts a
    /// `content_blobs` row if this hash is new. A hash collision with an
    /// existing blob of identical size is treated as deduplication
    /// (spec.md §4.5) — the bytes are not re-verified.
    pub fn put(&self, bytes: &[u8], mime: &str) -> Result<String> {
        let content_id = sha256_hex(bytes);
        let conn = self.conn.lock()?;

        if db::get_content_blob(&conn, &content_id)?.is_none() {
            let file_name = format!("{content_id}{}", ext_for_mime(mime));
            let final_path = self.content_dir.join(&file_name);
            if !final_path.exists() {
                let tmp_path = self.content_dir.join(format!("{file_name}.tmp"));
                {
                    let mut f = fs::File::create(&tmp_path).map_err(|e| classify_io_error(e, &tmp_path))?;
                    f.write_all(bytes).map_err(|e| classify_io_error(e, &tmp_path))?;
                    f.sync_all().map_err(|e| classify_io_error(e, &tmp_path))?;
                }
                fs::rename(&tmp_path, &final_path).map_err(|e| classify_io_error(e, &final_path))?;
            }
            db::insert_content_blob_if_new(
                &conn,
                &content_id,
                bytes.len() as u64,
                mime,
                &final_path.to_string_lossy(),
            )?;
        }

        Ok(content_id)
    }

    pub fn get(&self, content_id: &str) -> Result<Vec<u8>> {
        let path = self.path_for(content_id)?;
        fs::read(&path).map_err(|e| classify_io_error(e, &path))
    }

    pub fn path_for(&self, content_id: &str) -> Result<PathBuf> {
        let conn = self.conn.lock()?;
        let blob = db::get_content_blob(&conn, content_id)?.ok_or_else(|| {
            crate::error::RagliteError::Validation(format!("unknown content id {content_id}"))
        })?;
        Ok(PathBuf::from(blob.on_disk_path))
    }

    /// Increments the refcount jointly maintained with `documents.content_id`.
    pub fn reference(&self, content_id: &str) -> Result<()> {
        let conn = self.conn.lock()?;
        db::ref_content_blob(&conn, content_id)
    }

    /// Decrements the refcount; deletes the on-disk file and row when it
    /// drops to zero.
    pub fn unreference(&self, content_id: &str) -> Result<()> {
        let conn = self.conn.lock()?;
        let blob = db::get_content_blob(&conn, content_id)?;
        let zero = db::unref_content_blob(&conn, content_id)?;
        if zero {
            if let Some(blob) = blob {
                let _ = fs::remove_file(&blob.on_disk_path);
            }
            db::delete_content_blob(&conn, content_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ensure_schema;

    fn store() -> (ContentStore, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let content_dir = tmp.path().join("content");
        fs::create_dir_all(&content_dir).unwrap();
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        (ContentStore::new(content_dir, conn), tmp)
    }

    #[test]
    fn put_dedupes_identical_bytes() {
        let (store, _tmp) = store();
        let id1 = store.put(b"hello", "text/plain").unwrap();
        let id2 = store.put(b"hello", "text/plain").unwrap();
        assert_eq!(id1, id2);
        store.reference(&id1).unwrap();
        store.reference(&id1).unwrap();
        assert!(store.get(&id1).unwrap() == b"hello");
    }

    #[test]
    fn unreference_deletes_at_zero_refcount() {
        let (store, _tmp) = store();
        let id = store.put(b"payload", "text/plain").unwrap();
        store.reference(&id).unwrap();
        let path = store.path_for(&id).unwrap();
        assert!(path.exists());
        store.unreference(&id).unwrap();
        assert!(!path.exists());
    }
}
