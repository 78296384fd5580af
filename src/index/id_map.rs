//! `embedding_id <-> numeric_id` bijection (spec.md §3 IdMap, §4.9).
//!
//! `numeric_id = hash(embedding_id)` via a 32-bit polynomial hash, with
//! open-address collision resolution: on collision, increment (mod 2^31)
//! until a free slot is found. Both directions are kept in memory; the
//! table is also persisted (spec.md §9's recommended deviation) so a
//! crash-safe reopen doesn't depend on `ORDER BY id` replaying the exact
//! original insertion order.

use std::collections::HashMap;

const MODULUS: u32 = 0x7fff_ffff; // 2^31 - 1, keeps ids non-negative as i64 in SQLite.

/// 32-bit polynomial hash (`hash = hash * 31 + byte`), folded into the
/// `[0, 2^31)` range so it never collides with SQLite's signed-integer
/// column range.
pub fn polynomial_hash(s: &str) -> u32 {
    let mut hash: u32 = 0;
    for b in s.as_bytes() {
        hash = hash.wrapping_mul(31).wrapping_add(*b as u32);
    }
    hash % MODULUS
}

#[derive(Debug, Default, Clone)]
pub struct IdMap {
    embedding_to_numeric: HashMap<String, u32>,
    numeric_to_embedding: HashMap<u32, String>,
}

impl IdMap {
    pub fn new() -> IdMap {
        IdMap::default()
    }

    /// Rebuilds the map from a persisted `(embedding_id, numeric_id)` list
    /// (the `id_map` table), in the order it was loaded.
    pub fn from_pairs(pairs: Vec<(String, u32)>) -> IdMap {
        let mut map = IdMap::new();
        for (embedding_id, numeric_id) in pairs {
            map.embedding_to_numeric.insert(embedding_id.clone(), numeric_id);
            map.numeric_to_embedding.insert(numeric_id, embedding_id);
        }
        map
    }

    /// Assigns (or returns the existing) numeric id for `embedding_id`,
    /// probing forward on hash collision.
    pub fn assign(&mut self, embedding_id: &str) -> u32 {
        if let Some(existing) = self.embedding_to_numeric.get(embedding_id) {
            return *existing;
        }
        let mut candidate = polynomial_hash(embedding_id);
        while self.numeric_to_embedding.contains_key(&candidate) {
            candidate = (candidate + 1) % MODULUS;
        }
        self.embedding_to_numeric
            .insert(embedding_id.to_string(), candidate);
        self.numeric_to_embedding
            .insert(candidate, embedding_id.to_string());
        candidate
    }

    pub fn numeric_id(&self, embedding_id: &str) -> Option<u32> {
        self.embedding_to_numeric.get(embedding_id).copied()
    }

    pub fn embedding_id(&self, numeric_id: u32) -> Option<&str> {
        self.numeric_to_embedding.get(&numeric_id).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.embedding_to_numeric.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embedding_to_numeric.is_empty()
    }

    pub fn clear(&mut self) {
        self.embedding_to_numeric.clear();
        self.numeric_to_embedding.clear();
    }
}
