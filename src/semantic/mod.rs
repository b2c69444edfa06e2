//! Embedding cache and similarity engine.
//!
//! # Architecture
//!
//! - `storage`: per-item CSV records (embeddings, relation snapshots, tag snapshots)
//! - `index`: in-memory cosine similarity over the whole cached set

mod index;
mod storage;

pub use index::VectorIndex;
#[cfg(test)]
pub use storage::RelationRecord;
pub use storage::{CacheError, EmbeddingCache, EmbeddingRecord, RelationCache, TagSnapshotCache};
