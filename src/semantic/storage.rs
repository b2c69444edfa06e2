//! Per-item cache files on top of a [`StorageManager`].
//!
//! Layout, one file per content id and artifact:
//! - `post-<id>-embedding.csv`: `content_id,title,embedding`, the vector as a
//!   JSON array of floats
//! - `post-<id>-relations.csv`: `rank,related_id,title,score`
//! - `post-<id>-tags.csv`: `content_id,tag`
//!
//! Every write goes through `StorageManager::write`, so a record is either
//! fully present or absent.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::storage::StorageManager;

static EMBEDDING_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^post-(.+)-embedding\.csv$").expect("valid embedding key regex"));

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("no cached record for {0}")]
    NotFound(String),

    #[error("invalid content id {0:?}")]
    InvalidId(String),

    #[error("malformed cache record for {id}: {message}")]
    Malformed { id: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

fn check_id(id: &str) -> Result<(), CacheError> {
    if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
        return Err(CacheError::InvalidId(id.to_string()));
    }
    Ok(())
}

fn embedding_key(id: &str) -> String {
    format!("post-{id}-embedding.csv")
}

fn relations_key(id: &str) -> String {
    format!("post-{id}-relations.csv")
}

fn tags_key(id: &str) -> String {
    format!("post-{id}-tags.csv")
}

fn to_csv<T: Serialize>(rows: &[T]) -> Result<Vec<u8>, CacheError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.into_inner().map_err(|err| CacheError::Io(err.into_error()))
}

fn from_csv<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<Vec<T>, CacheError> {
    let mut rdr = csv::Reader::from_reader(data);
    let mut rows = vec![];
    for row in rdr.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

/// Snapshot keys of one kind, by file suffix.
fn snapshot_keys(storage: &dyn StorageManager, suffix: &str) -> Vec<String> {
    storage
        .list()
        .into_iter()
        .filter(|key| key.starts_with("post-") && key.ends_with(suffix))
        .collect()
}

fn clear_snapshots(storage: &dyn StorageManager, suffix: &str) -> Result<usize, CacheError> {
    let keys = snapshot_keys(storage, suffix);
    for key in &keys {
        storage.delete(key)?;
    }
    Ok(keys.len())
}

fn read_key(storage: &dyn StorageManager, id: &str, key: &str) -> Result<Vec<u8>, CacheError> {
    storage.read(key).map_err(|err| match err.kind() {
        ErrorKind::NotFound => CacheError::NotFound(id.to_string()),
        _ => CacheError::Io(err),
    })
}

/// Cached embedding for one content item. Never rewritten once stored.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub content_id: String,
    pub title: String,
    pub vector: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EmbeddingRow {
    content_id: String,
    title: String,
    embedding: String,
}

#[derive(Clone)]
pub struct EmbeddingCache {
    storage: Arc<dyn StorageManager>,
}

impl EmbeddingCache {
    pub fn new(storage: Arc<dyn StorageManager>) -> Self {
        Self { storage }
    }

    pub fn exists(&self, id: &str) -> bool {
        check_id(id).is_ok() && self.storage.exists(&embedding_key(id))
    }

    pub fn get(&self, id: &str) -> Result<EmbeddingRecord, CacheError> {
        check_id(id)?;
        let data = read_key(self.storage.as_ref(), id, &embedding_key(id))?;
        let row = from_csv::<EmbeddingRow>(&data)?
            .into_iter()
            .next()
            .ok_or_else(|| CacheError::Malformed {
                id: id.to_string(),
                message: "embedding file has no rows".to_string(),
            })?;

        let vector: Vec<f32> = serde_json::from_str(&row.embedding)?;
        if vector.is_empty() {
            return Err(CacheError::Malformed {
                id: id.to_string(),
                message: "embedding vector is empty".to_string(),
            });
        }

        Ok(EmbeddingRecord {
            content_id: row.content_id,
            title: row.title,
            vector,
        })
    }

    pub fn put(&self, record: &EmbeddingRecord) -> Result<(), CacheError> {
        check_id(&record.content_id)?;
        let row = EmbeddingRow {
            content_id: record.content_id.clone(),
            title: record.title.clone(),
            embedding: serde_json::to_string(&record.vector)?,
        };
        let data = to_csv(&[row])?;
        self.storage.write(&embedding_key(&record.content_id), &data)?;
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<(), CacheError> {
        check_id(id)?;
        self.storage.delete(&embedding_key(id))?;
        Ok(())
    }

    /// Ids of every persisted embedding, in ascending order.
    pub fn list_ids(&self) -> BTreeSet<String> {
        self.storage
            .list()
            .iter()
            .filter_map(|key| EMBEDDING_KEY.captures(key))
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
            .collect()
    }

    /// Load every record in `list_ids` order, skipping unreadable ones.
    pub fn load_all(&self) -> Vec<EmbeddingRecord> {
        self.list_ids()
            .into_iter()
            .filter_map(|id| match self.get(&id) {
                Ok(record) => Some(record),
                Err(err) => {
                    log::warn!("skipping cached embedding for {id}: {err}");
                    None
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Related {
    pub related_id: String,
    pub title: String,
    pub score: f32,
}

/// Ranked neighbor snapshot of one item, replaced wholesale on every run.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationRecord {
    pub content_id: String,
    pub related: Vec<Related>,
}

impl RelationRecord {
    pub fn related_ids(&self) -> Vec<String> {
        self.related.iter().map(|r| r.related_id.clone()).collect()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RelationRow {
    rank: usize,
    related_id: String,
    title: String,
    score: f32,
}

#[derive(Clone)]
pub struct RelationCache {
    storage: Arc<dyn StorageManager>,
}

impl RelationCache {
    pub fn new(storage: Arc<dyn StorageManager>) -> Self {
        Self { storage }
    }

    #[cfg(test)]
    pub fn exists(&self, id: &str) -> bool {
        check_id(id).is_ok() && self.storage.exists(&relations_key(id))
    }

    pub fn get(&self, id: &str) -> Result<RelationRecord, CacheError> {
        check_id(id)?;
        let data = read_key(self.storage.as_ref(), id, &relations_key(id))?;
        let mut rows = from_csv::<RelationRow>(&data)?;
        rows.sort_by_key(|row| row.rank);

        Ok(RelationRecord {
            content_id: id.to_string(),
            related: rows
                .into_iter()
                .map(|row| Related {
                    related_id: row.related_id,
                    title: row.title,
                    score: row.score,
                })
                .collect(),
        })
    }

    pub fn put(&self, record: &RelationRecord) -> Result<(), CacheError> {
        check_id(&record.content_id)?;
        let rows = record
            .related
            .iter()
            .enumerate()
            .map(|(rank, r)| RelationRow {
                rank: rank + 1,
                related_id: r.related_id.clone(),
                title: r.title.clone(),
                score: r.score,
            })
            .collect::<Vec<_>>();

        // csv only emits the header alongside the first row
        let data = if rows.is_empty() {
            b"rank,related_id,title,score\n".to_vec()
        } else {
            to_csv(&rows)?
        };
        self.storage.write(&relations_key(&record.content_id), &data)?;
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<(), CacheError> {
        check_id(id)?;
        self.storage.delete(&relations_key(id))?;
        Ok(())
    }

    pub fn count(&self) -> usize {
        snapshot_keys(self.storage.as_ref(), "-relations.csv").len()
    }

    /// Delete every snapshot of this kind; returns how many were removed.
    pub fn clear(&self) -> Result<usize, CacheError> {
        clear_snapshots(self.storage.as_ref(), "-relations.csv")
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TagRow {
    content_id: String,
    tag: String,
}

/// Last descriptive tags generated and written back for an item.
#[derive(Clone)]
pub struct TagSnapshotCache {
    storage: Arc<dyn StorageManager>,
}

impl TagSnapshotCache {
    pub fn new(storage: Arc<dyn StorageManager>) -> Self {
        Self { storage }
    }

    pub fn exists(&self, id: &str) -> bool {
        check_id(id).is_ok() && self.storage.exists(&tags_key(id))
    }

    #[cfg(test)]
    pub fn get(&self, id: &str) -> Result<Vec<String>, CacheError> {
        check_id(id)?;
        let data = read_key(self.storage.as_ref(), id, &tags_key(id))?;
        Ok(from_csv::<TagRow>(&data)?
            .into_iter()
            .map(|row| row.tag)
            .collect())
    }

    pub fn put(&self, id: &str, tags: &[String]) -> Result<(), CacheError> {
        check_id(id)?;
        let rows = tags
            .iter()
            .map(|tag| TagRow {
                content_id: id.to_string(),
                tag: tag.clone(),
            })
            .collect::<Vec<_>>();
        let data = if rows.is_empty() {
            b"content_id,tag\n".to_vec()
        } else {
            to_csv(&rows)?
        };
        self.storage.write(&tags_key(id), &data)?;
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<(), CacheError> {
        check_id(id)?;
        self.storage.delete(&tags_key(id))?;
        Ok(())
    }

    pub fn count(&self) -> usize {
        snapshot_keys(self.storage.as_ref(), "-tags.csv").len()
    }

    pub fn clear(&self) -> Result<usize, CacheError> {
        clear_snapshots(self.storage.as_ref(), "-tags.csv")
    }
}
