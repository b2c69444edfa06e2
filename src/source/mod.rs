//! Remote content service.
//!
//! The pipeline only depends on [`ContentSource`]; `GhostClient` is the
//! HTTP implementation. Stale-version writes must surface as
//! `SourceError::Conflict` and deleted items as `SourceError::NotFound`.

mod ghost;
mod token;

pub use ghost::GhostClient;
pub use token::admin_token;

use serde::{Deserialize, Serialize};

use crate::content::{Body, ContentItem, Tag};
use crate::document::Document;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("item not found")]
    NotFound,

    #[error("item was modified concurrently (stale version)")]
    Conflict,

    #[error("content service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("cannot sign request: {0}")]
    Auth(String),
}

#[derive(Debug, Clone)]
pub struct Page {
    pub items: Vec<ContentItem>,
    pub pages: u32,
    pub total: u64,
}

pub trait ContentSource: Send + Sync {
    /// One page of items, 1-based.
    fn list_page(&self, page: u32) -> Result<Page, SourceError>;

    fn get_item(&self, id: &str) -> Result<ContentItem, SourceError>;

    /// Replace the item's tag set; `version` must be the one just read.
    fn update_tags(&self, id: &str, tags: &[Tag], version: &str) -> Result<(), SourceError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WireTag {
    pub name: String,
    #[serde(default)]
    pub slug: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WirePost {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub mobiledoc: Option<String>,
    #[serde(default)]
    pub tags: Vec<WireTag>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl From<WirePost> for ContentItem {
    fn from(post: WirePost) -> Self {
        let body = match post.mobiledoc.as_deref() {
            None => Body::Absent,
            Some(raw) => match Document::parse(raw) {
                Ok(doc) => Body::Parsed(doc),
                Err(err) => Body::Unparseable(err.to_string()),
            },
        };

        ContentItem {
            id: post.id,
            title: post.title.unwrap_or_default(),
            body,
            tags: post
                .tags
                .into_iter()
                .map(|t| Tag::new(t.name, t.slug))
                .collect(),
            version: post.updated_at.unwrap_or_default(),
        }
    }
}
