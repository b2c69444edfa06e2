//! In-memory similarity engine over the cached embedding set.
//!
//! Every run rebuilds the index from the cache and recomputes each item's
//! neighbors from scratch, O(N² · D). There is no incremental index.
//!
//! Equal scores keep the enumeration order of the index (stable sort). That
//! tie-break is incidental, not a contract.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::semantic::storage::{EmbeddingRecord, Related, RelationRecord};

#[derive(Debug, Clone)]
struct IndexEntry {
    id: String,
    title: String,
    embedding: Vec<f32>,
    norm: f64,
}

/// Read-only set of embeddings for one similarity run.
#[derive(Debug, Default)]
pub struct VectorIndex {
    entries: Vec<IndexEntry>,
    ids: HashSet<String>,
    dimensions: Option<usize>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index, dropping (and logging) records that cannot be inserted.
    pub fn from_records(records: impl IntoIterator<Item = EmbeddingRecord>) -> Self {
        let mut index = Self::new();
        for record in records {
            let id = record.content_id.clone();
            if let Err(err) = index.insert(record) {
                log::warn!("leaving {id} out of the similarity run: {err}");
            }
        }
        index
    }

    /// Dimension fixed by the first inserted vector.
    #[cfg(test)]
    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Ids in enumeration order.
    #[cfg(test)]
    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|e| e.id.as_str())
    }

    pub fn insert(&mut self, record: EmbeddingRecord) -> Result<(), IndexError> {
        if record.vector.is_empty() {
            return Err(IndexError::EmptyVector);
        }

        match self.dimensions {
            Some(expected) if expected != record.vector.len() => {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    got: record.vector.len(),
                });
            }
            Some(_) => {}
            None => self.dimensions = Some(record.vector.len()),
        }

        if self.ids.contains(&record.content_id) {
            return Err(IndexError::DuplicateId(record.content_id));
        }

        let norm = l2_norm(&record.vector);
        self.ids.insert(record.content_id.clone());
        self.entries.push(IndexEntry {
            id: record.content_id,
            title: record.title,
            embedding: record.vector,
            norm,
        });

        Ok(())
    }

    /// Up to `k` nearest neighbors of `id`, excluding `id` itself.
    pub fn nearest(&self, id: &str, k: usize) -> Option<Vec<Related>> {
        let target = self.entries.iter().find(|e| e.id == id)?;

        let mut scored: Vec<Related> = self
            .entries
            .iter()
            .filter(|e| e.id != target.id)
            .map(|e| Related {
                related_id: e.id.clone(),
                title: e.title.clone(),
                score: cosine_similarity(target, e),
            })
            .collect();

        // sort_by is stable: equal scores keep enumeration order
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        scored.truncate(k);

        Some(scored)
    }

    /// Relation snapshot for every indexed item, in enumeration order.
    pub fn relations(&self, k: usize) -> Vec<RelationRecord> {
        self.entries
            .iter()
            .map(|e| RelationRecord {
                content_id: e.id.clone(),
                related: self.nearest(&e.id, k).unwrap_or_default(),
            })
            .collect()
    }
}

fn l2_norm(v: &[f32]) -> f64 {
    v.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt()
}

/// Cosine similarity; zero-norm vectors score 0.0 against everything.
fn cosine_similarity(a: &IndexEntry, b: &IndexEntry) -> f32 {
    if a.norm < f64::EPSILON || b.norm < f64::EPSILON {
        return 0.0;
    }

    let dot: f64 = a
        .embedding
        .iter()
        .zip(b.embedding.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let score = (dot / (a.norm * b.norm)) as f32;
    if score.is_finite() {
        score.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Embedding vector is empty")]
    EmptyVector,

    #[error("Duplicate content id {0}")]
    DuplicateId(String),
}
