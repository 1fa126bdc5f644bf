//! In-memory exact-cosine vector index
//!
//! The index maps chunk text to `(vector, metadata)`. Text keys are unique:
//! re-inserting a key overwrites vector and metadata in place, keeping the
//! original insertion slot so tie-breaks on search stay stable. Queries are
//! a brute-force cosine scan, which is adequate for the corpus sizes this
//! service targets; an ANN backend could replace the scan without changing
//! the contract.

use crate::error::{IndexError, Result};
use crate::ingest::types::{keys, Metadata, MetadataExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// A scored search hit
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    text: String,
    vector: Vec<f32>,
    metadata: Metadata,
}

/// Snapshot entry: text and metadata without the vector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub text: String,
    pub metadata: Metadata,
}

/// Exact cosine search over an in-memory entry list
#[derive(Debug, Default)]
pub struct VectorIndex {
    entries: Vec<IndexEntry>,
    by_text: HashMap<String, usize>,
    dimension: Option<usize>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Vector dimension, fixed by the first insertion
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Calculate cosine similarity between two vectors
    pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return 0.0;
        }

        let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }

        dot_product / (norm_a * norm_b)
    }

    /// Insert an entry; an existing text key is overwritten in place.
    ///
    /// The first insertion fixes the vector dimension; later inserts with a
    /// different dimension are rejected. Metadata must carry a filename.
    pub fn insert(&mut self, text: String, vector: Vec<f32>, metadata: Metadata) -> Result<()> {
        if metadata.filename().is_none() {
            return Err(IndexError::InvalidMetadata(
                "missing required key 'filename'".to_string(),
            )
            .into());
        }

        match self.dimension {
            Some(expected) if expected != vector.len() => {
                return Err(IndexError::DimensionError {
                    expected,
                    actual: vector.len(),
                }
                .into());
            }
            None => self.dimension = Some(vector.len()),
            _ => {}
        }

        match self.by_text.get(&text) {
            Some(&slot) => {
                self.entries[slot].vector = vector;
                self.entries[slot].metadata = metadata;
            }
            None => {
                self.by_text.insert(text.clone(), self.entries.len());
                self.entries.push(IndexEntry {
                    text,
                    vector,
                    metadata,
                });
            }
        }

        Ok(())
    }

    /// Top-k cosine search. `k` is clamped to the index size; an empty index
    /// or `k = 0` yields an empty result. Ties keep insertion order.
    pub fn search(&self, query_vector: &[f32], k: usize) -> Vec<SearchHit> {
        if self.entries.is_empty() || k == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, Self::cosine_similarity(query_vector, &e.vector)))
            .collect();

        // Stable sort keeps insertion order for equal scores
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k.min(self.entries.len()));

        debug!("Search returned {} hits", scored.len());

        scored
            .into_iter()
            .map(|(i, score)| SearchHit {
                text: self.entries[i].text.clone(),
                score,
            })
            .collect()
    }

    /// Look up the metadata stored for a text key
    pub fn get_metadata(&self, text: &str) -> Option<&Metadata> {
        self.by_text.get(text).map(|&slot| &self.entries[slot].metadata)
    }

    /// Remove every entry whose metadata filename matches; returns the count.
    /// The removal is all-or-nothing with respect to concurrent readers
    /// because callers hold the surrounding writer lock.
    pub fn delete_by_filename(&mut self, filename: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|e| e.metadata.filename() != Some(filename));
        let removed = before - self.entries.len();

        if removed > 0 {
            self.by_text.clear();
            for (i, e) in self.entries.iter().enumerate() {
                self.by_text.insert(e.text.clone(), i);
            }
        }

        removed
    }

    /// Enumerate `(text, metadata)` pairs without vectors
    pub fn snapshot(&self) -> Vec<SnapshotEntry> {
        self.entries
            .iter()
            .map(|e| SnapshotEntry {
                text: e.text.clone(),
                metadata: e.metadata.clone(),
            })
            .collect()
    }

    /// Count entries for a given filename
    pub fn count_by_filename(&self, filename: &str) -> usize {
        self.entries
            .iter()
            .filter(|e| e.metadata.filename() == Some(filename))
            .count()
    }

    /// Drop every entry and reset the dimension
    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_text.clear();
        self.dimension = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::MetaValue;

    fn meta(filename: &str) -> Metadata {
        let mut m = Metadata::new();
        m.insert(keys::FILENAME.to_string(), MetaValue::from(filename));
        m
    }

    #[test]
    fn test_insert_and_search() {
        let mut index = VectorIndex::new();
        index
            .insert("alpha".to_string(), vec![1.0, 0.0], meta("a.txt"))
            .unwrap();
        index
            .insert("beta".to_string(), vec![0.0, 1.0], meta("b.txt"))
            .unwrap();

        let hits = index.search(&[1.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "alpha");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_search_empty_and_zero_k() {
        let index = VectorIndex::new();
        assert!(index.search(&[1.0], 5).is_empty());

        let mut index = VectorIndex::new();
        index
            .insert("x".to_string(), vec![1.0], meta("x.txt"))
            .unwrap();
        assert!(index.search(&[1.0], 0).is_empty());
    }

    #[test]
    fn test_k_clamped_to_size() {
        let mut index = VectorIndex::new();
        index
            .insert("only".to_string(), vec![1.0, 0.0], meta("a.txt"))
            .unwrap();
        let hits = index.search(&[1.0, 0.0], 10);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_overwrite_keeps_uniqueness() {
        let mut index = VectorIndex::new();
        index
            .insert("dup".to_string(), vec![1.0, 0.0], meta("a.txt"))
            .unwrap();
        index
            .insert("dup".to_string(), vec![0.0, 1.0], meta("b.txt"))
            .unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(
            index.get_metadata("dup").unwrap().filename(),
            Some("b.txt")
        );
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut index = VectorIndex::new();
        index
            .insert("a".to_string(), vec![1.0, 0.0], meta("a.txt"))
            .unwrap();
        let err = index
            .insert("b".to_string(), vec![1.0, 0.0, 0.0], meta("b.txt"))
            .unwrap_err();
        assert_eq!(err.status_code(), 500);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_missing_filename_rejected() {
        let mut index = VectorIndex::new();
        let err = index
            .insert("a".to_string(), vec![1.0], Metadata::new())
            .unwrap_err();
        assert_eq!(err.category(), "index");
    }

    #[test]
    fn test_delete_by_filename_atomic() {
        let mut index = VectorIndex::new();
        index
            .insert("a1".to_string(), vec![1.0, 0.0], meta("a.txt"))
            .unwrap();
        index
            .insert("a2".to_string(), vec![0.5, 0.5], meta("a.txt"))
            .unwrap();
        index
            .insert("b1".to_string(), vec![0.0, 1.0], meta("b.txt"))
            .unwrap();

        let removed = index.delete_by_filename("a.txt");
        assert_eq!(removed, 2);
        assert_eq!(index.len(), 1);
        assert!(index.get_metadata("a1").is_none());
        assert!(index.get_metadata("b1").is_some());

        // After deletion, lookups and search still agree
        let hits = index.search(&[0.0, 1.0], 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "b1");
    }

    #[test]
    fn test_tie_break_is_insertion_order() {
        let mut index = VectorIndex::new();
        index
            .insert("first".to_string(), vec![1.0, 0.0], meta("a.txt"))
            .unwrap();
        index
            .insert("second".to_string(), vec![1.0, 0.0], meta("b.txt"))
            .unwrap();

        let hits = index.search(&[1.0, 0.0], 2);
        assert_eq!(hits[0].text, "first");
        assert_eq!(hits[1].text, "second");
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];

        assert_eq!(VectorIndex::cosine_similarity(&a, &b), 1.0);
        assert_eq!(VectorIndex::cosine_similarity(&a, &c), 0.0);
        assert_eq!(VectorIndex::cosine_similarity(&a, &[0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_snapshot_has_no_vectors() {
        let mut index = VectorIndex::new();
        index
            .insert("a".to_string(), vec![1.0], meta("a.txt"))
            .unwrap();
        let snap = index.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].text, "a");
        assert_eq!(snap[0].metadata.filename(), Some("a.txt"));
    }
}
