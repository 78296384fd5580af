//! Binary on-disk format for the vector index (C1).
//!
//! One file, little-endian, fixed header then payload (spec.md §4.1):
//!
//! ```text
//! magic: [u8; 4]        "RLI2"
//! version: u16
//! dimensions: u16
//! max_elements: u32
//! m: u16
//! ef_construction: u16
//! seed: u32
//! current_size: u32
//! flags: u16             bit 0: has_content_type_groups
//! hnsw_blob_len: u64
//! <hnsw_blob_len bytes>   combined-graph vectors, as (numeric_id: u32, f32[dimensions])*
//! if has_content_type_groups:
//!   text_count: u32
//!   <text_count * (numeric_id: u32, f32[dimensions])>
//!   image_count: u32
//!   <image_count * (numeric_id: u32, f32[dimensions])>
//! ```
//!
//! The "hnsw blob" is not a serialization of the `hnsw_rs` graph's internal
//! layers — it is the flat `(numeric_id, vector)` array the graph is
//! rebuilt from on load, the same approach the teacher's `IdentityDisk`
//! uses to reconstruct its in-memory `Hnsw` from stored blobs. This keeps
//! the on-disk format stable across `hnsw_rs` internal-format changes and
//! matches the round-trip contract, which is specified over header fields
//! and per-vector tuples, not over the graph engine's private layout.
//!
//! Readers accept files without the grouped-payload section
//! (`flags & 1 == 0`): a text-only dataset never writes it, per §4.1's
//! backward-compatibility contract. Version 2 additionally does not
//! duplicate the combined-graph vectors inside the grouped section — see
//! DESIGN.md for why that resolves spec.md §9's second open question.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{RagliteError, Result};

pub const MAGIC: [u8; 4] = *b"RLI2";
pub const VERSION: u16 = 2;

const FLAG_HAS_CONTENT_TYPE_GROUPS: u16 = 1 << 0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexHeader {
    pub version: u16,
    pub dimensions: u16,
    pub max_elements: u32,
    pub m: u16,
    pub ef_construction: u16,
    pub seed: u32,
    pub current_size: u32,
    pub has_content_type_groups: bool,
}

/// The decoded contents of an `index.bin` file.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexFile {
    pub header: IndexHeader,
    /// `(numeric_id, vector)` pairs for the combined graph.
    pub vectors: Vec<(u32, Vec<f32>)>,
    /// Present only when `header.has_content_type_groups`.
    pub text_vectors: Vec<(u32, Vec<f32>)>,
    pub image_vectors: Vec<(u32, Vec<f32>)>,
}

fn write_vectors<W: Write>(w: &mut W, dims: u16, vectors: &[(u32, Vec<f32>)]) -> Result<()> {
    for (id, vector) in vectors {
        if vector.len() != dims as usize {
            return Err(RagliteError::IndexDimensionMismatch {
                expected: dims,
                actual: vector.len() as u16,
            });
        }
        w.write_u32::<LittleEndian>(*id)?;
        for f in vector {
            w.write_f32::<LittleEndian>(*f)?;
        }
    }
    Ok(())
}

fn read_vectors<R: Read>(r: &mut R, dims: u16, count: u32) -> Result<Vec<(u32, Vec<f32>)>> {
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let id = r
            .read_u32::<LittleEndian>()
            .map_err(|e| RagliteError::IndexTruncated(e.to_string()))?;
        let mut vector = Vec::with_capacity(dims as usize);
        for _ in 0..dims {
            let f = r
                .read_f32::<LittleEndian>()
                .map_err(|e| RagliteError::IndexTruncated(e.to_string()))?;
            vector.push(f);
        }
        out.push((id, vector));
    }
    Ok(out)
}

/// Serializes `file` to `path` via `<path>.tmp` then rename, for save
/// atomicity (spec.md §4.1).
pub fn save(path: &Path, file: &IndexFile) -> Result<()> {
    let mut tmp_path = path.to_path_buf();
    let file_name = format!(
        "{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("index.bin")
    );
    tmp_path.set_file_name(file_name);

    {
        let f = File::create(&tmp_path).map_err(|e| crate::error::classify_io_error(e, &tmp_path))?;
        let mut w = BufWriter::new(f);

        w.write_all(&MAGIC)?;
        w.write_u16::<LittleEndian>(file.header.version)?;
        w.write_u16::<LittleEndian>(file.header.dimensions)?;
        w.write_u32::<LittleEndian>(file.header.max_elements)?;
        w.write_u16::<LittleEndian>(file.header.m)?;
        w.write_u16::<LittleEndian>(file.header.ef_construction)?;
        w.write_u32::<LittleEndian>(file.header.seed)?;
        w.write_u32::<LittleEndian>(file.header.current_size)?;
        let flags = if file.header.has_content_type_groups {
            FLAG_HAS_CONTENT_TYPE_GROUPS
        } else {
            0
        };
        w.write_u16::<LittleEndian>(flags)?;

        let mut blob = Vec::new();
        write_vectors(&mut blob, file.header.dimensions, &file.vectors)?;
        w.write_u64::<LittleEndian>(blob.len() as u64)?;
        w.write_all(&blob)?;

        if file.header.has_content_type_groups {
            w.write_u32::<LittleEndian>(file.text_vectors.len() as u32)?;
            write_vectors(&mut w, file.header.dimensions, &file.text_vectors)?;
            w.write_u32::<LittleEndian>(file.image_vectors.len() as u32)?;
            write_vectors(&mut w, file.header.dimensions, &file.image_vectors)?;
        }

        w.flush()?;
        w.get_ref().sync_all()?;
    }

    fs::rename(&tmp_path, path).map_err(|e| crate::error::classify_io_error(e, path))?;
    Ok(())
}

/// Deserializes `path`. Any magic/version/dimension mismatch fails with
/// `IndexCorrupt`; a truncated payload fails with `IndexTruncated`.
pub fn load(path: &Path) -> Result<IndexFile> {
    let f = File::open(path).map_err(|e| crate::error::classify_io_error(e, path))?;
    let mut r = BufReader::new(f);

    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)
        .map_err(|e| RagliteError::IndexTruncated(e.to_string()))?;
    if magic != MAGIC {
        return Err(RagliteError::IndexCorrupt(format!(
            "bad magic: {magic:?}"
        )));
    }

    let version = r
        .read_u16::<LittleEndian>()
        .map_err(|e| RagliteError::IndexTruncated(e.to_string()))?;
    if version > VERSION {
        return Err(RagliteError::IndexCorrupt(format!(
            "unsupported index version {version}, reader supports up to {VERSION}"
        )));
    }

    let dimensions = r
        .read_u16::<LittleEndian>()
        .map_err(|e| RagliteError::IndexTruncated(e.to_string()))?;
    let max_elements = r
        .read_u32::<LittleEndian>()
        .map_err(|e| RagliteError::IndexTruncated(e.to_string()))?;
    let m = r
        .read_u16::<LittleEndian>()
        .map_err(|e| RagliteError::IndexTruncated(e.to_string()))?;
    let ef_construction = r
        .read_u16::<LittleEndian>()
        .map_err(|e| RagliteError::IndexTruncated(e.to_string()))?;
    let seed = r
        .read_u32::<LittleEndian>()
        .map_err(|e| RagliteError::IndexTruncated(e.to_string()))?;
    let current_size = r
        .read_u32::<LittleEndian>()
        .map_err(|e| RagliteError::IndexTruncated(e.to_string()))?;
    let flags = r
        .read_u16::<LittleEndian>()
        .map_err(|e| RagliteError::IndexTruncated(e.to_string()))?;
    let has_content_type_groups = flags & FLAG_HAS_CONTENT_TYPE_GROUPS != 0;

    let blob_len = r
        .read_u64::<LittleEndian>()
        .map_err(|e| RagliteError::IndexTruncated(e.to_string()))?;
    let mut blob = vec![0u8; blob_len as usize];
    r.read_exact(&mut blob)
        .map_err(|e| RagliteError::IndexTruncated(e.to_string()))?;
    let vector_count = blob_len / (4 + dimensions as u64 * 4);
    let vectors = read_vectors(&mut &blob[..], dimensions, vector_count as u32)?;

    let (text_vectors, image_vectors) = if has_content_type_groups {
        let text_count = r
            .read_u32::<LittleEndian>()
            .map_err(|e| RagliteError::IndexTruncated(e.to_string()))?;
        let text_vectors = read_vectors(&mut r, dimensions, text_count)?;
        let image_count = r
            .read_u32::<LittleEndian>()
            .map_err(|e| RagliteError::IndexTruncated(e.to_string()))?;
        let image_vectors = read_vectors(&mut r, dimensions, image_count)?;
        (text_vectors, image_vectors)
    } else {
        (Vec::new(), Vec::new())
    };

    Ok(IndexFile {
        header: IndexHeader {
            version,
            dimensions,
            max_elements,
            m,
            ef_construction,
            seed,
            current_size,
            has_content_type_groups,
        },
        vectors,
        text_vectors,
        image_vectors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(has_groups: bool) -> IndexFile {
        IndexFile {
            header: IndexHeader {
                version: VERSION,
                dimensions: 3,
                max_elements: 100_000,
                m: 16,
                ef_construction: 200,
                seed: 100,
                current_size: 2,
                has_content_type_groups: has_groups,
            },
            vectors: vec![(1, vec![1.0, 2.0, 3.0]), (2, vec![4.0, 5.0, 6.0])],
            text_vectors: if has_groups {
                vec![(1, vec![1.0, 2.0, 3.0])]
            } else {
                Vec::new()
            },
            image_vectors: if has_groups {
                vec![(2, vec![4.0, 5.0, 6.0])]
            } else {
                Vec::new()
            },
        }
    }

    #[test]
    fn round_trip_text_only() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index.bin");
        let file = sample(false);
        save(&path, &file).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded, file);
    }

    #[test]
    fn round_trip_grouped() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index.bin");
        let file = sample(true);
        save(&path, &file).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded, file);
    }

    #[test]
    fn bad_magic_is_index_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index.bin");
        fs::write(&path, b"NOPE0000000000000000").unwrap();
        let err = load(&path).unwrap_err();
        assert!(matches!(err, RagliteError::IndexCorrupt(_)));
    }

    #[test]
    fn truncated_payload_is_index_truncated() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index.bin");
        save(&path, &sample(false)).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 4);
        fs::write(&path, &bytes).unwrap();
        let err = load(&path).unwrap_err();
        assert!(matches!(err, RagliteError::IndexTruncated(_)));
    }

    #[test]
    fn save_is_atomic_via_tmp_rename() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index.bin");
        save(&path, &sample(false)).unwrap();
        assert!(!tmp.path().join("index.bin.tmp").exists());
    }
}
