use crate::semantic::{CacheError, EmbeddingCache, RelationCache, TagSnapshotCache};

/// Drops every local artifact of an item the remote confirmed as gone, so a
/// later run treats the id as new. Only called after a `NotFound`.
#[derive(Clone)]
pub struct Invalidator {
    embeddings: EmbeddingCache,
    relations: RelationCache,
    tags: TagSnapshotCache,
}

impl Invalidator {
    pub fn new(embeddings: EmbeddingCache, relations: RelationCache, tags: TagSnapshotCache) -> Self {
        Self {
            embeddings,
            relations,
            tags,
        }
    }

    pub fn invalidate(&self, id: &str) -> Result<(), CacheError> {
        self.embeddings.delete(id)?;
        self.relations.delete(id)?;
        self.tags.delete(id)?;
        log::info!("post-{id}: removed from remote, local cache purged");
        Ok(())
    }
}
