//! Merging computed tags into a remote item's tag set.
//!
//! Every write-back is a single read, merge, write pass that carries the
//! version read in the same pass. A stale version is reported as
//! `RemoteConflict` and is never retried here.

use std::collections::HashSet;
use std::sync::Arc;

use crate::content::{partition_tags, Tag};
use crate::errors::PipelineError;
use crate::invalidate::Invalidator;
use crate::source::ContentSource;

/// Which namespaces a cleanup run strips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Scope {
    Internal,
    Public,
    Both,
}

impl Scope {
    pub fn strips_internal(self) -> bool {
        matches!(self, Scope::Internal | Scope::Both)
    }

    pub fn strips_public(self) -> bool {
        matches!(self, Scope::Public | Scope::Both)
    }
}

#[derive(Debug, Clone)]
pub enum TagUpdate<'a> {
    /// Replace the internal namespace with one marker per related id.
    Relations(&'a [String]),
    /// Append generated public tags, optionally dropping the existing ones.
    Descriptive { generated: &'a [String], reset: bool },
    Strip(Scope),
}

fn push_unique(out: &mut Vec<Tag>, seen: &mut HashSet<String>, tag: Tag) {
    if seen.insert(tag.name.clone()) {
        out.push(tag);
    }
}

pub fn merge_relation_tags(existing: &[Tag], related_ids: &[String]) -> Vec<Tag> {
    let (_, public) = partition_tags(existing);

    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(public.len() + related_ids.len());
    for tag in public {
        push_unique(&mut merged, &mut seen, tag);
    }
    for id in related_ids {
        push_unique(&mut merged, &mut seen, Tag::internal(id));
    }
    merged
}

/// Internal tags first, then the kept public tags, then generated ones.
/// Dedup is by exact, case-sensitive name.
pub fn merge_descriptive_tags(existing: &[Tag], generated: &[String], reset: bool) -> Vec<Tag> {
    let (internal, public) = partition_tags(existing);

    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(existing.len() + generated.len());
    for tag in internal {
        push_unique(&mut merged, &mut seen, tag);
    }
    if !reset {
        for tag in public {
            push_unique(&mut merged, &mut seen, tag);
        }
    }
    for tag in generated.iter().map(|name| Tag::public(name)) {
        if tag.is_internal() {
            log::warn!("dropping generated tag {:?}: reserved marker", tag.name);
            continue;
        }
        push_unique(&mut merged, &mut seen, tag);
    }
    merged
}

pub fn strip_namespaces(existing: &[Tag], scope: Scope) -> Vec<Tag> {
    existing
        .iter()
        .filter(|tag| {
            if tag.is_internal() {
                !scope.strips_internal()
            } else {
                !scope.strips_public()
            }
        })
        .cloned()
        .collect()
}

pub fn merge(existing: &[Tag], update: &TagUpdate<'_>) -> Vec<Tag> {
    match update {
        TagUpdate::Relations(ids) => merge_relation_tags(existing, ids),
        TagUpdate::Descriptive { generated, reset } => {
            merge_descriptive_tags(existing, generated, *reset)
        }
        TagUpdate::Strip(scope) => strip_namespaces(existing, *scope),
    }
}

pub struct Reconciler {
    source: Arc<dyn ContentSource>,
    invalidator: Invalidator,
}

impl Reconciler {
    pub fn new(source: Arc<dyn ContentSource>, invalidator: Invalidator) -> Self {
        Self {
            source,
            invalidator,
        }
    }

    /// Returns the tag set that was written.
    pub fn reconcile(&self, id: &str, update: &TagUpdate<'_>) -> Result<Vec<Tag>, PipelineError> {
        let item = self.source.get_item(id).map_err(|err| self.classify(id, err.into()))?;

        let merged = merge(&item.tags, update);
        log::debug!(
            "post-{id}: {} tags -> {} tags at version {}",
            item.tags.len(),
            merged.len(),
            item.version
        );

        self.source
            .update_tags(id, &merged, &item.version)
            .map_err(|err| self.classify(id, err.into()))?;

        Ok(merged)
    }

    fn classify(&self, id: &str, err: PipelineError) -> PipelineError {
        if let PipelineError::RemoteNotFound = err {
            if let Err(cache_err) = self.invalidator.invalidate(id) {
                log::error!("post-{id}: failed to purge cache: {cache_err}");
                return PipelineError::Cache(cache_err);
            }
        }
        err
    }
}
