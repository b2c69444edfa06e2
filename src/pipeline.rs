//! Batch runs over the remote collection.
//!
//! Everything is sequential: one page at a time, one item at a time. A run
//! only aborts when the first listing call fails; every other error is
//! scoped to its item, logged, counted and the walk continues.

use std::sync::Arc;

use serde::Serialize;

use crate::config::Config;
use crate::content::ContentItem;
use crate::errors::PipelineError;
use crate::extract::{extract_body, ExtractError};
use crate::invalidate::Invalidator;
use crate::providers::{EmbeddingProvider, ProviderError};
use crate::reconcile::{strip_namespaces, Reconciler, Scope, TagUpdate};
use crate::retry::retry;
use crate::semantic::{
    EmbeddingCache, EmbeddingRecord, RelationCache, TagSnapshotCache, VectorIndex,
};
use crate::source::ContentSource;
use crate::storage::StorageManager;
use crate::tagging::TagGenerator;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub processed: usize,
    pub succeeded: usize,
    /// Nothing to do: already cached, no body, nothing to strip.
    pub skipped: usize,
    pub failed: usize,
    pub invalidated: usize,
}

impl RunSummary {
    fn record(&mut self, id: &str, result: Result<Outcome, PipelineError>) {
        self.processed += 1;
        match result {
            Ok(Outcome::Done) => self.succeeded += 1,
            Ok(Outcome::Skipped) => self.skipped += 1,
            Err(PipelineError::MalformedContent(_)) => self.skipped += 1,
            Err(err) => {
                if let PipelineError::RemoteNotFound = err {
                    self.invalidated += 1;
                }
                log::warn!("post-{id}: skipped: {err}");
                self.failed += 1;
            }
        }
    }

    /// Fold another run into this one, as `sync` does.
    pub fn absorb(&mut self, other: RunSummary) {
        self.processed += other.processed;
        self.succeeded += other.succeeded;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.invalidated += other.invalidated;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Done,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStatus {
    pub embeddings: usize,
    pub relations: usize,
    pub tag_snapshots: usize,
}

/// Counts of local artifacts; never touches the network.
pub fn cache_status(storage: Arc<dyn StorageManager>) -> CacheStatus {
    CacheStatus {
        embeddings: EmbeddingCache::new(storage.clone()).list_ids().len(),
        relations: RelationCache::new(storage.clone()).count(),
        tag_snapshots: TagSnapshotCache::new(storage).count(),
    }
}

pub struct Pipeline {
    config: Arc<Config>,
    source: Arc<dyn ContentSource>,
    embeddings: EmbeddingCache,
    relations: RelationCache,
    tag_snapshots: TagSnapshotCache,
    reconciler: Reconciler,
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        source: Arc<dyn ContentSource>,
        storage: Arc<dyn StorageManager>,
    ) -> Self {
        let embeddings = EmbeddingCache::new(storage.clone());
        let relations = RelationCache::new(storage.clone());
        let tag_snapshots = TagSnapshotCache::new(storage);
        let invalidator =
            Invalidator::new(embeddings.clone(), relations.clone(), tag_snapshots.clone());

        Pipeline {
            config,
            reconciler: Reconciler::new(source.clone(), invalidator),
            source,
            embeddings,
            relations,
            tag_snapshots,
        }
    }

    /// Embed every remote item that has no cached embedding yet.
    pub fn embed_all(&self, embedder: &dyn EmbeddingProvider) -> Result<RunSummary, PipelineError> {
        let summary = self.walk(|item| self.embed_item(embedder, item))?;
        log::info!("embed finished: {summary:?}");
        Ok(summary)
    }

    fn embed_item(
        &self,
        embedder: &dyn EmbeddingProvider,
        item: &ContentItem,
    ) -> Result<Outcome, PipelineError> {
        if self.embeddings.exists(&item.id) {
            log::debug!("post-{}: embedding cached", item.id);
            return Ok(Outcome::Skipped);
        }

        let body = extract(item)?;
        let text = format!("{}\n{}", item.title, body);

        let vector = retry(
            self.config.provider_attempts,
            ProviderError::is_retryable,
            |_| embedder.embed(&text),
        )
        .map_err(|err| {
            log::error!(
                "post-{}: embedding failed: {err}; title={:?} text={:?} body={:?}",
                item.id,
                item.title,
                text,
                item.body
            );
            err
        })?;

        self.embeddings.put(&EmbeddingRecord {
            content_id: item.id.clone(),
            title: item.title.clone(),
            vector,
        })?;
        log::info!("post-{}: embedded {:?}", item.id, item.title);
        Ok(Outcome::Done)
    }

    /// Recompute every relation snapshot from the whole embedding cache and
    /// write the internal tags of each cached item.
    pub fn relate_all(&self) -> Result<RunSummary, PipelineError> {
        self.preflight()?;

        let index = VectorIndex::from_records(self.embeddings.load_all());
        if index.is_empty() {
            log::info!("no cached embeddings, nothing to relate");
        } else {
            log::info!(
                "computing relations for {} items (k = {})",
                index.len(),
                self.config.max_related_count
            );
        }

        let mut summary = RunSummary::default();

        // ids left out of the index must not keep an old snapshot
        for id in self.embeddings.list_ids() {
            if !index.contains(&id) {
                log::warn!("post-{id}: not in similarity run, dropping relation snapshot");
                let result = self.relations.delete(&id).map(|()| Outcome::Skipped);
                summary.record(&id, result.map_err(PipelineError::from));
            }
        }
        let mut written = vec![];
        for record in index.relations(self.config.max_related_count) {
            match self.relations.put(&record) {
                Ok(()) => written.push(record.content_id),
                Err(err) => summary.record(&record.content_id, Err(err.into())),
            }
        }

        for id in written {
            let result = self.relate_item(&id);
            summary.record(&id, result);
        }

        log::info!("relate finished: {summary:?}");
        Ok(summary)
    }

    fn relate_item(&self, id: &str) -> Result<Outcome, PipelineError> {
        let snapshot = self.relations.get(id)?;
        let related = snapshot.related_ids();
        self.reconciler.reconcile(id, &TagUpdate::Relations(&related))?;
        log::info!("post-{id}: linked to {related:?}");
        Ok(Outcome::Done)
    }

    /// Generate descriptive tags. Without `reset` only items that have no
    /// tag snapshot yet are processed.
    pub fn tag_all(&self, generator: &TagGenerator, reset: bool) -> Result<RunSummary, PipelineError> {
        let summary = self.walk(|item| self.tag_item(generator, item, reset))?;
        log::info!("tag finished: {summary:?}");
        Ok(summary)
    }

    fn tag_item(
        &self,
        generator: &TagGenerator,
        item: &ContentItem,
        reset: bool,
    ) -> Result<Outcome, PipelineError> {
        if !reset && self.tag_snapshots.exists(&item.id) {
            log::debug!("post-{}: already tagged", item.id);
            return Ok(Outcome::Skipped);
        }

        let body = extract(item)?;
        let generated = generator.generate(&body).map_err(|err| {
            log::error!(
                "post-{}: tag generation failed: {err}; title={:?} text={:?} body={:?}",
                item.id,
                item.title,
                body,
                item.body
            );
            err
        })?;

        if generated.tags.is_empty() {
            log::warn!(
                "post-{}: no usable tags; prompt={:?} response={:?}",
                item.id,
                generated.prompt,
                generated.response
            );
            // a reset still has to drop the old public tags
            if !reset {
                return Ok(Outcome::Skipped);
            }
        }

        let update = TagUpdate::Descriptive {
            generated: &generated.tags,
            reset,
        };
        self.reconciler.reconcile(&item.id, &update)?;
        self.tag_snapshots.put(&item.id, &generated.tags)?;

        log::info!("post-{}: tagged {:?}", item.id, generated.tags);
        Ok(Outcome::Done)
    }

    /// Strip the chosen namespaces from every remote item. With
    /// `purge_cache` the matching local snapshots go too; embeddings never do.
    pub fn cleanup(&self, scope: Scope, purge_cache: bool) -> Result<RunSummary, PipelineError> {
        let summary = self.walk(|item| {
            if strip_namespaces(&item.tags, scope) == item.tags {
                return Ok(Outcome::Skipped);
            }
            self.reconciler.reconcile(&item.id, &TagUpdate::Strip(scope))?;
            log::info!("post-{}: stripped {scope:?} tags", item.id);
            Ok(Outcome::Done)
        })?;

        if purge_cache {
            if scope.strips_internal() {
                let removed = self.relations.clear()?;
                log::info!("removed {removed} relation snapshots");
            }
            if scope.strips_public() {
                let removed = self.tag_snapshots.clear()?;
                log::info!("removed {removed} tag snapshots");
            }
        }

        log::info!("cleanup finished: {summary:?}");
        Ok(summary)
    }

    fn preflight(&self) -> Result<crate::source::Page, PipelineError> {
        self.source.list_page(1).map_err(|err| {
            log::error!("pre-flight listing failed: {err}");
            PipelineError::Preflight(err)
        })
    }

    /// Visit every remote item, page by page. Only the first listing call
    /// is fatal; a later page that fails to load is logged and skipped.
    fn walk<F>(&self, mut visit: F) -> Result<RunSummary, PipelineError>
    where
        F: FnMut(&ContentItem) -> Result<Outcome, PipelineError>,
    {
        let first = self.preflight()?;
        let pages = first.pages;
        log::info!("{} items across {} pages", first.total, pages);

        let mut summary = RunSummary::default();
        let mut current = Some(first);
        let mut number = 1;

        loop {
            if let Some(page) = current.take() {
                for item in &page.items {
                    summary.record(&item.id, visit(item));
                }
            }

            number += 1;
            if number > pages {
                break;
            }
            match self.source.list_page(number) {
                Ok(page) => current = Some(page),
                Err(err) => log::error!("failed to list page {number}/{pages}: {err}"),
            }
        }

        Ok(summary)
    }
}

/// Body text, or a `MalformedContent` skip logged by kind.
fn extract(item: &ContentItem) -> Result<String, PipelineError> {
    extract_body(&item.body).map_err(|err| {
        match &err {
            ExtractError::MissingBody => log::info!("post-{}: no body, skipping", item.id),
            ExtractError::Empty => log::warn!("post-{}: empty body, skipping", item.id),
            ExtractError::Malformed(reason) => {
                log::warn!("post-{}: unparseable body, skipping: {reason}", item.id)
            }
        }
        err.into()
    })
}
