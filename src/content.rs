use serde::{Deserialize, Serialize};

use crate::document::Document;

/// Leading character of a tag name that puts it in the internal namespace.
pub const INTERNAL_MARKER: char = '#';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagNamespace {
    Internal,
    Public,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub slug: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, slug: impl Into<String>) -> Self {
        Tag {
            name: name.into(),
            slug: slug.into(),
        }
    }

    /// Relation marker pointing at another content item.
    pub fn internal(related_id: &str) -> Self {
        Tag::new(format!("{INTERNAL_MARKER}{related_id}"), related_id)
    }

    pub fn public(name: &str) -> Self {
        Tag::new(name, name)
    }

    pub fn namespace(&self) -> TagNamespace {
        if self.name.starts_with(INTERNAL_MARKER) {
            TagNamespace::Internal
        } else {
            TagNamespace::Public
        }
    }

    pub fn is_internal(&self) -> bool {
        self.namespace() == TagNamespace::Internal
    }
}

/// Split tags into `(internal, public)` keeping the original order in each.
pub fn partition_tags(tags: &[Tag]) -> (Vec<Tag>, Vec<Tag>) {
    tags.iter().cloned().partition(Tag::is_internal)
}

/// State of an item's structured body as delivered by the content source.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Absent,
    Unparseable(String),
    Parsed(Document),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContentItem {
    pub id: String,
    pub title: String,
    pub body: Body,
    pub tags: Vec<Tag>,
    /// Opaque optimistic-concurrency token; must accompany every write-back.
    pub version: String,
}
