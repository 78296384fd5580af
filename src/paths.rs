use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{classify_io_error, Result};

/// Canonical on-disk layout rooted at `<root>/.raglite/` (spec.md §6).
#[derive(Debug, Clone)]
pub struct DatasetPaths {
    pub root: PathBuf,
    pub raglite_dir: PathBuf,
    pub db_path: PathBuf,
    pub index_path: PathBuf,
    pub content_dir: PathBuf,
}

impl DatasetPaths {
    /// Resolves `(root) -> {raglite_dir, db_path, index_path, content_dir}`
    /// and idempotently creates the directories.
    pub fn resolve<P: AsRef<Path>>(root: P) -> Result<DatasetPaths> {
        let root = root.as_ref().to_path_buf();
        let raglite_dir = root.join(".raglite");
        let content_dir = raglite_dir.join("content");
        fs::create_dir_all(&content_dir).map_err(|e| classify_io_error(e, &content_dir))?;

        Ok(DatasetPaths {
            db_path: raglite_dir.join("db.sqlite"),
            index_path: raglite_dir.join("index.bin"),
            content_dir,
            raglite_dir,
            root,
        })
    }

    /// Migrates a legacy `(db_path, index_path)` pair to the canonical
    /// layout rooted at the parent of `db_path`.
    pub fn from_legacy(db_path: &Path, index_path: &Path) -> Result<DatasetPaths> {
        let parent = db_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        let paths = DatasetPaths::resolve(&parent)?;
        if db_path != paths.db_path && db_path.exists() && !paths.db_path.exists() {
            fs::copy(db_path, &paths.db_path).map_err(|e| classify_io_error(e, db_path))?;
        }
        if index_path != paths.index_path && index_path.exists() && !paths.index_path.exists() {
            fs::copy(index_path, &paths.index_path).map_err(|e| classify_io_error(e, index_path))?;
        }
        Ok(paths)
    }

    pub fn index_tmp_path(&self) -> PathBuf {
        let mut tmp = self.index_path.clone();
        tmp.set_extension("bin.tmp");
        tmp
    }

    /// Deletes `db.sqlite` and `index.bin` atomically (enough for a
    /// single-process rebuild): both removals are attempted and any
    /// "file didn't exist" error is swallowed since the end state is the
    /// same either way.
    pub fn destroy_dataset_files(&self) -> Result<()> {
        for path in [&self.db_path, &self.index_path] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(classify_io_error(e, path)),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_creates_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = DatasetPaths::resolve(tmp.path()).unwrap();
        assert!(paths.content_dir.is_dir());
        assert_eq!(paths.db_path, paths.raglite_dir.join("db.sqlite"));
        assert_eq!(paths.index_path, paths.raglite_dir.join("index.bin"));
    }

    #[test]
    fn resolve_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let a = DatasetPaths::resolve(tmp.path()).unwrap();
        let b = DatasetPaths::resolve(tmp.path()).unwrap();
        assert_eq!(a.db_path, b.db_path);
    }
}
