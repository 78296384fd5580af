//! Vector index (C2): a wrapper over `hnsw_rs` parameterized by
//! `{D, M=16, efConstruction=200, seed=100}` and an initial
//! `max_elements=100_000` (spec.md §4.2).

use hnsw_rs::prelude::*;

use crate::error::{RagliteError, Result};
use crate::index::format::{IndexFile, IndexHeader};

pub const DEFAULT_M: usize = 16;
pub const DEFAULT_EF_CONSTRUCTION: usize = 200;
pub const DEFAULT_SEED: u32 = 100;
pub const DEFAULT_MAX_ELEMENTS: usize = 100_000;
const DEFAULT_EF_SEARCH: usize = 100;
/// Resize threshold: grow once `current_size + n` would exceed this
/// fraction of `max_elements` (spec.md §4.2).
const RESIZE_LOAD_FACTOR: f64 = 0.9;
/// Growth factor applied to `current_size + n` when resizing.
const RESIZE_GROWTH_FACTOR: f64 = 1.5;

/// All vectors currently held by one HNSW graph, kept alongside the
/// `hnsw_rs` graph itself so the graph can be rebuilt in place on resize —
/// `hnsw_rs` has no in-place capacity growth, so "resize in place" here
/// means: construct a new graph at the larger capacity and replay every
/// existing insert, which is observably in-place (ids and vectors survive,
/// callers never see the rebuild).
pub struct VectorIndex {
    dimensions: u16,
    max_elements: usize,
    m: usize,
    ef_construction: usize,
    seed: u32,
    vectors: Vec<(u32, Vec<f32>)>,
    hnsw: Hnsw<'static, f32, DistCosine>,
}

impl VectorIndex {
    /// Starts a new, empty graph (spec.md §4.2 `init`).
    pub fn empty(dimensions: u16) -> VectorIndex {
        VectorIndex::with_capacity(dimensions, DEFAULT_MAX_ELEMENTS)
    }

    fn with_capacity(dimensions: u16, max_elements: usize) -> VectorIndex {
        let hnsw = Hnsw::new(
            DEFAULT_M,
            max_elements.max(1),
            DEFAULT_M,
            DEFAULT_EF_CONSTRUCTION,
            DistCosine {},
        );
        VectorIndex {
            dimensions,
            max_elements,
            m: DEFAULT_M,
            ef_construction: DEFAULT_EF_CONSTRUCTION,
            seed: DEFAULT_SEED,
            vectors: Vec::new(),
            hnsw,
        }
    }

    /// Restores via the binary format (C1).
    pub fn from_file(file: IndexFile) -> Result<VectorIndex> {
        let mut index = VectorIndex::with_capacity(
            file.header.dimensions,
            file.header.max_elements as usize,
        );
        index.m = file.header.m as usize;
        index.ef_construction = file.header.ef_construction as usize;
        index.seed = file.header.seed;
        index.bulk_load(&file.vectors)?;
        Ok(index)
    }

    /// Re-inserts every vector into a fresh `hnsw_rs` graph. Used both on
    /// load and after a capacity resize.
    fn bulk_load(&mut self, vectors: &[(u32, Vec<f32>)]) -> Result<()> {
        for (id, vector) in vectors {
            if vector.len() != self.dimensions as usize {
                return Err(RagliteError::IndexDimensionMismatch {
                    expected: self.dimensions,
                    actual: vector.len() as u16,
                });
            }
            self.hnsw.insert((vector, *id as usize));
        }
        self.vectors = vectors.to_vec();
        Ok(())
    }

    pub fn dimensions(&self) -> u16 {
        self.dimensions
    }

    pub fn max_elements(&self) -> usize {
        self.max_elements
    }

    pub fn count(&self) -> u32 {
        self.vectors.len() as u32
    }

    fn resize_if_needed(&mut self, incoming: usize) -> Result<()> {
        let projected = self.vectors.len() + incoming;
        if (projected as f64) <= RESIZE_LOAD_FACTOR * self.max_elements as f64 {
            return Ok(());
        }
        let new_capacity = ((projected as f64) * RESIZE_GROWTH_FACTOR).ceil() as usize;
        let existing = std::mem::take(&mut self.vectors);
        let mut rebuilt = VectorIndex::with_capacity(self.dimensions, new_capacity);
        rebuilt.m = self.m;
        rebuilt.ef_construction = self.ef_construction;
        rebuilt.seed = self.seed;
        rebuilt.bulk_load(&existing)?;
        *self = rebuilt;
        Ok(())
    }

    /// Bulk insert; resizes first if `current_size + n > 0.9 * max_elements`
    /// (spec.md §4.2). Resize preserves all existing ids.
    pub fn add(&mut self, batch: &[(u32, Vec<f32>)]) -> Result<()> {
        self.resize_if_needed(batch.len())?;
        for (id, vector) in batch {
            if vector.len() != self.dimensions as usize {
                return Err(RagliteError::IndexDimensionMismatch {
                    expected: self.dimensions,
                    actual: vector.len() as u16,
                });
            }
            self.hnsw.insert((vector, *id as usize));
            self.vectors.push((*id, vector.clone()));
        }
        Ok(())
    }

    /// Top-k by cosine distance. Ties are broken by `numeric_id` ascending
    /// (spec.md §5), which `hnsw_rs` does not guarantee on its own, so the
    /// tie-break is applied as a stable secondary sort key here.
    pub fn search(&self, query: &[f32], k: u32) -> Result<(Vec<u32>, Vec<f32>)> {
        if query.len() != self.dimensions as usize {
            return Err(RagliteError::IndexDimensionMismatch {
                expected: self.dimensions,
                actual: query.len() as u16,
            });
        }
        if self.vectors.is_empty() || k == 0 {
            return Ok((Vec::new(), Vec::new()));
        }
        let ef_search = DEFAULT_EF_SEARCH.max(k as usize);
        let mut neighbors = self.hnsw.search(query, k as usize, ef_search);
        neighbors.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.d_id.cmp(&b.d_id))
        });
        let ids = neighbors.iter().map(|n| n.d_id as u32).collect();
        let distances = neighbors.iter().map(|n| n.distance).collect();
        Ok((ids, distances))
    }

    pub fn vectors(&self) -> &[(u32, Vec<f32>)] {
        &self.vectors
    }

    pub fn to_header(&self, has_content_type_groups: bool) -> IndexHeader {
        IndexHeader {
            version: crate::index::format::VERSION,
            dimensions: self.dimensions,
            max_elements: self.max_elements as u32,
            m: self.m as u16,
            ef_construction: self.ef_construction as u16,
            seed: self.seed,
            current_size: self.vectors.len() as u32,
            has_content_type_groups,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_vector(dims: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dims];
        v[hot] = 1.0;
        v
    }

    #[test]
    fn add_and_search_returns_nearest() {
        let mut index = VectorIndex::empty(4);
        index
            .add(&[
                (1, unit_vector(4, 0)),
                (2, unit_vector(4, 1)),
                (3, unit_vector(4, 2)),
            ])
            .unwrap();
        assert_eq!(index.count(), 3);
        let (ids, _distances) = index.search(&unit_vector(4, 0), 1).unwrap();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn search_respects_top_k() {
        let mut index = VectorIndex::empty(4);
        index
            .add(&[
                (1, unit_vector(4, 0)),
                (2, unit_vector(4, 1)),
                (3, unit_vector(4, 2)),
            ])
            .unwrap();
        let (ids, distances) = index.search(&unit_vector(4, 0), 2).unwrap();
        assert!(ids.len() <= 2);
        assert_eq!(ids.len(), distances.len());
    }

    #[test]
    fn resize_preserves_existing_ids() {
        let mut index = VectorIndex::with_capacity(4, 4);
        index
            .add(&[(1, unit_vector(4, 0)), (2, unit_vector(4, 1))])
            .unwrap();
        let before_max = index.max_elements();

        // 2 existing + 3 incoming = 5 > 0.9 * 4, must resize.
        index
            .add(&[
                (3, unit_vector(4, 2)),
                (4, unit_vector(4, 3)),
                (5, unit_vector(4, 0)),
            ])
            .unwrap();

        assert!(index.max_elements() > before_max);
        assert_eq!(index.count(), 5);
        let ids: Vec<u32> = index.vectors().iter().map(|(id, _)| *id).collect();
        for expected in [1, 2, 3, 4, 5] {
            assert!(ids.contains(&expected), "id {expected} missing after resize");
        }
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut index = VectorIndex::empty(4);
        let err = index.add(&[(1, vec![1.0, 2.0])]).unwrap_err();
        assert!(matches!(err, RagliteError::IndexDimensionMismatch { .. }));
    }

    #[test]
    fn empty_index_search_returns_empty() {
        let index = VectorIndex::empty(4);
        let (ids, distances) = index.search(&unit_vector(4, 0), 5).unwrap();
        assert!(ids.is_empty() && distances.is_empty());
    }
}
