use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::fakes::{config, pipeline, post, FakeCompleter, FakeEmbedder, FakeSource};
use crate::content::{Body, Tag};
use crate::errors::PipelineError;
use crate::pipeline::{cache_status, Pipeline, RunSummary};
use crate::reconcile::Scope;
use crate::semantic::{EmbeddingCache, RelationCache, TagSnapshotCache};
use crate::storage::StorageManager;
use crate::tagging::TagGenerator;

fn triangle() -> (Arc<FakeSource>, FakeEmbedder) {
    let source = Arc::new(FakeSource::new(
        vec![
            post("a", "A", "alpha"),
            post("b", "B", "beta"),
            post("c", "C", "gamma"),
        ],
        2,
    ));
    // cos(a,b) = 0.9, cos(a,c) = 0.1, cos(b,c) = 0.2 within rounding
    let embedder = FakeEmbedder::new(&[
        ("A", vec![1.0, 0.0, 0.0]),
        ("B", vec![0.9, 0.435_889_9, 0.0]),
        ("C", vec![0.1, 0.252_357_3, 0.962_453]),
    ]);
    (source, embedder)
}

#[test]
pub fn test_embed_is_compute_if_absent() {
    let (source, embedder) = triangle();
    let (pipeline, storage) = pipeline(config(1), source);

    let first = pipeline.embed_all(&embedder).unwrap();
    assert_eq!(first.succeeded, 3);
    assert_eq!(embedder.calls(), 3);

    let second = pipeline.embed_all(&embedder).unwrap();
    assert_eq!(embedder.calls(), 3);
    assert_eq!(
        second,
        RunSummary {
            processed: 3,
            skipped: 3,
            ..Default::default()
        }
    );
    assert_eq!(cache_status(storage).embeddings, 3);
}

#[test]
pub fn test_relate_writes_nearest_neighbor_tags() {
    let (source, embedder) = triangle();
    source.set_tags("a", vec![Tag::public("GREEK"), Tag::internal("stale")]);
    let (pipeline, storage) = pipeline(config(1), source.clone());

    pipeline.embed_all(&embedder).unwrap();
    let summary = pipeline.relate_all().unwrap();
    assert_eq!(summary.succeeded, 3);

    assert_eq!(
        source.tags("a"),
        vec![Tag::public("GREEK"), Tag::internal("b")]
    );
    assert_eq!(source.tags("b"), vec![Tag::internal("a")]);
    assert_eq!(source.tags("c"), vec![Tag::internal("b")]);

    let relations = RelationCache::new(storage);
    let c = relations.get("c").unwrap();
    assert_eq!(c.related_ids(), vec!["b"]);
    assert!((c.related[0].score - 0.2).abs() < 1e-3);
}

#[test]
pub fn test_relate_twice_is_idempotent() {
    let (source, embedder) = triangle();
    let (pipeline, _) = pipeline(config(2), source.clone());

    pipeline.embed_all(&embedder).unwrap();
    pipeline.relate_all().unwrap();
    let once = source.tags("a");
    pipeline.relate_all().unwrap();

    assert_eq!(source.tags("a"), once);
    assert_eq!(once, vec![Tag::internal("b"), Tag::internal("c")]);
}

#[test]
pub fn test_relation_never_contains_self() {
    let (source, embedder) = triangle();
    let (pipeline, storage) = pipeline(config(10), source);

    pipeline.embed_all(&embedder).unwrap();
    pipeline.relate_all().unwrap();

    let relations = RelationCache::new(storage);
    for id in ["a", "b", "c"] {
        let record = relations.get(id).unwrap();
        assert_eq!(record.related.len(), 2);
        assert!(!record.related_ids().contains(&id.to_string()));
        assert!(record.related[0].score >= record.related[1].score);
    }
}

#[test]
pub fn test_not_found_invalidates_cache() {
    let (source, embedder) = triangle();
    let (pipeline, storage) = pipeline(config(1), source.clone());

    pipeline.embed_all(&embedder).unwrap();
    source.remove("c");

    let summary = pipeline.relate_all().unwrap();
    assert_eq!(summary.invalidated, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 2);

    assert!(!EmbeddingCache::new(storage.clone()).exists("c"));
    assert!(!RelationCache::new(storage.clone()).exists("c"));
    assert!(EmbeddingCache::new(storage).exists("a"));
}

#[test]
pub fn test_conflict_skips_only_that_item() {
    let (source, embedder) = triangle();
    source.race_on_write.lock().unwrap().insert("b".to_string());
    let (pipeline, _) = pipeline(config(1), source.clone());

    pipeline.embed_all(&embedder).unwrap();
    let summary = pipeline.relate_all().unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 2);
    assert!(source.tags("b").is_empty());
    assert_eq!(source.tags("c"), vec![Tag::internal("b")]);
}

#[test]
pub fn test_provider_failure_does_not_abort_run() {
    let (source, mut embedder) = triangle();
    embedder.failing.insert("B".to_string());
    let (pipeline, storage) = pipeline(config(1), source);

    let summary = pipeline.embed_all(&embedder).unwrap();
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    // a and c once, b twice (one retry)
    assert_eq!(embedder.calls(), 4);

    let ids: Vec<_> = EmbeddingCache::new(storage).list_ids().into_iter().collect();
    assert_eq!(ids, vec!["a", "c"]);
}

#[test]
pub fn test_malformed_bodies_are_skipped() {
    let mut missing = post("m", "Missing", "");
    missing.body = Body::Absent;
    let mut broken = post("x", "Broken", "");
    broken.body = Body::Unparseable("bad json".to_string());
    let source = Arc::new(FakeSource::new(
        vec![missing, broken, post("ok", "Ok", "fine")],
        10,
    ));
    let embedder = FakeEmbedder::default();
    let (pipeline, _) = pipeline(config(1), source);

    let summary = pipeline.embed_all(&embedder).unwrap();
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(embedder.calls(), 1);
}

#[test]
pub fn test_preflight_failure_is_fatal() {
    let (source, embedder) = triangle();
    *source.listing_down.lock().unwrap() = true;
    let (pipeline, _) = pipeline(config(1), source);

    assert!(matches!(
        pipeline.embed_all(&embedder),
        Err(PipelineError::Preflight(_))
    ));
    assert!(matches!(pipeline.relate_all(), Err(PipelineError::Preflight(_))));
    assert_eq!(embedder.calls(), 0);
}

#[test]
pub fn test_tag_merges_with_existing_public_tags() {
    let source = Arc::new(FakeSource::new(vec![post("a", "A", "cats and dogs")], 10));
    source.set_tags("a", vec![Tag::public("ANIMALS"), Tag::internal("b")]);
    let completer = Arc::new(FakeCompleter::replying(
        "Animals, Pets\nTwo Word Tag Too Long",
    ));
    let config = config(1);
    let generator = TagGenerator::new(completer.clone(), &config);
    let (pipeline, storage) = pipeline(config, source.clone());

    let summary = pipeline.tag_all(&generator, false).unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(
        source.tags("a"),
        vec![Tag::internal("b"), Tag::public("ANIMALS"), Tag::public("PETS")]
    );

    let snapshot = TagSnapshotCache::new(storage).get("a").unwrap();
    assert_eq!(snapshot, vec!["ANIMALS", "PETS"]);

    // snapshot present: nothing to do without reset
    let again = pipeline.tag_all(&generator, false).unwrap();
    assert_eq!(again.skipped, 1);
    assert_eq!(completer.calls(), 1);
}

#[test]
pub fn test_tag_reset_replaces_public_tags() {
    let source = Arc::new(FakeSource::new(vec![post("a", "A", "rust")], 10));
    source.set_tags("a", vec![Tag::public("OLD"), Tag::internal("b")]);
    let completer = Arc::new(FakeCompleter::replying("Rust"));
    let config = config(1);
    let generator = TagGenerator::new(completer, &config);
    let (pipeline, _) = pipeline(config, source.clone());

    pipeline.tag_all(&generator, false).unwrap();
    pipeline.tag_all(&generator, true).unwrap();

    assert_eq!(source.tags("a"), vec![Tag::internal("b"), Tag::public("RUST")]);
}

#[test]
pub fn test_tag_provider_failure_retries_once_and_skips() {
    let source = Arc::new(FakeSource::new(vec![post("a", "A", "text")], 10));
    let completer = Arc::new(FakeCompleter::failing(500));
    let config = config(1);
    let generator = TagGenerator::new(completer.clone(), &config);
    let (pipeline, storage) = pipeline(config, source.clone());

    let summary = pipeline.tag_all(&generator, false).unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(completer.calls(), 2);
    assert_eq!(source.writes.load(Ordering::SeqCst), 0);
    assert!(!TagSnapshotCache::new(storage).exists("a"));
}

#[test]
pub fn test_cleanup_strips_scope_and_purges_cache() {
    let (source, embedder) = triangle();
    source.set_tags("a", vec![Tag::public("KEEP")]);
    let (pipeline, storage) = pipeline(config(1), source.clone());

    pipeline.embed_all(&embedder).unwrap();
    pipeline.relate_all().unwrap();
    TagSnapshotCache::new(storage.clone())
        .put("a", &["KEEP".to_string()])
        .unwrap();

    let summary = pipeline.cleanup(Scope::Internal, true).unwrap();
    assert_eq!(summary.succeeded, 3);
    assert_eq!(source.tags("a"), vec![Tag::public("KEEP")]);
    assert!(source.tags("b").is_empty());

    let status = cache_status(storage);
    assert_eq!(status.relations, 0);
    assert_eq!(status.tag_snapshots, 1);
    assert_eq!(status.embeddings, 3);

    // nothing left to strip
    let again = pipeline.cleanup(Scope::Internal, false).unwrap();
    assert_eq!(again.skipped, 3);
}

#[test]
pub fn test_generated_tags_never_enter_internal_namespace() {
    let source = Arc::new(FakeSource::new(vec![post("a", "A", "rust memory")], 10));
    source.set_tags("a", vec![Tag::internal("b")]);
    let completer = Arc::new(FakeCompleter::replying("#rust, Memory"));
    let config = config(1);
    let generator = TagGenerator::new(completer, &config);
    let (pipeline, _) = pipeline(config, source.clone());

    pipeline.tag_all(&generator, false).unwrap();

    let tags = source.tags("a");
    assert_eq!(
        tags,
        vec![Tag::internal("b"), Tag::public("RUST"), Tag::public("MEMORY")]
    );
    let internal: Vec<_> = tags.iter().filter(|tag| tag.is_internal()).collect();
    assert_eq!(internal, vec![&Tag::internal("b")]);
}

#[test]
pub fn test_tag_reset_without_usable_tags_drops_public_tags() {
    let source = Arc::new(FakeSource::new(vec![post("a", "A", "text")], 10));
    source.set_tags("a", vec![Tag::public("OLD"), Tag::internal("b")]);
    let completer = Arc::new(FakeCompleter::replying("one two three four"));
    let config = config(1);
    let generator = TagGenerator::new(completer, &config);
    let (pipeline, storage) = pipeline(config, source.clone());

    let summary = pipeline.tag_all(&generator, true).unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(source.tags("a"), vec![Tag::internal("b")]);
    assert!(TagSnapshotCache::new(storage).get("a").unwrap().is_empty());
}

#[test]
pub fn test_tag_without_usable_tags_leaves_item_alone() {
    let source = Arc::new(FakeSource::new(vec![post("a", "A", "text")], 10));
    source.set_tags("a", vec![Tag::public("OLD")]);
    let completer = Arc::new(FakeCompleter::replying("one two three four"));
    let config = config(1);
    let generator = TagGenerator::new(completer, &config);
    let (pipeline, _) = pipeline(config, source.clone());

    let summary = pipeline.tag_all(&generator, false).unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(source.writes.load(Ordering::SeqCst), 0);
    assert_eq!(source.tags("a"), vec![Tag::public("OLD")]);
}

#[test]
pub fn test_relate_drops_snapshot_of_unindexed_item() {
    let (source, embedder) = triangle();
    let (pipeline, storage) = pipeline(config(1), source);

    pipeline.embed_all(&embedder).unwrap();
    pipeline.relate_all().unwrap();
    assert!(RelationCache::new(storage.clone()).exists("c"));

    storage
        .write("post-c-embedding.csv", b"content_id,title,embedding\nc,C,not-a-vector\n")
        .unwrap();
    let summary = pipeline.relate_all().unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.succeeded, 2);
    assert!(!RelationCache::new(storage.clone()).exists("c"));
    assert_eq!(RelationCache::new(storage).get("b").unwrap().related_ids(), vec!["a"]);
}

fn related_and_tagged() -> (Arc<FakeSource>, Pipeline, Arc<dyn StorageManager>) {
    let (source, embedder) = triangle();
    source.set_tags("a", vec![Tag::public("KEEP")]);
    let (pipeline, storage) = pipeline(config(1), source.clone());

    pipeline.embed_all(&embedder).unwrap();
    pipeline.relate_all().unwrap();
    TagSnapshotCache::new(storage.clone())
        .put("a", &["KEEP".to_string()])
        .unwrap();
    (source, pipeline, storage)
}

#[test]
pub fn test_cleanup_public_purges_tag_snapshots_only() {
    let (source, pipeline, storage) = related_and_tagged();

    let summary = pipeline.cleanup(Scope::Public, true).unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.skipped, 2);
    assert_eq!(source.tags("a"), vec![Tag::internal("b")]);
    assert_eq!(source.tags("b"), vec![Tag::internal("a")]);

    let status = cache_status(storage);
    assert_eq!(status.tag_snapshots, 0);
    assert_eq!(status.relations, 3);
    assert_eq!(status.embeddings, 3);
}

#[test]
pub fn test_cleanup_both_purges_every_snapshot() {
    let (source, pipeline, storage) = related_and_tagged();

    let summary = pipeline.cleanup(Scope::Both, true).unwrap();
    assert_eq!(summary.succeeded, 3);
    for id in ["a", "b", "c"] {
        assert!(source.tags(id).is_empty());
    }

    let status = cache_status(storage);
    assert_eq!(status.tag_snapshots, 0);
    assert_eq!(status.relations, 0);
    assert_eq!(status.embeddings, 3);
}

#[test]
pub fn test_sync_summary_absorbs_both_runs() {
    let mut embed = RunSummary {
        processed: 3,
        succeeded: 2,
        skipped: 1,
        ..Default::default()
    };
    embed.absorb(RunSummary {
        processed: 3,
        succeeded: 1,
        failed: 2,
        invalidated: 1,
        ..Default::default()
    });

    assert_eq!(
        embed,
        RunSummary {
            processed: 6,
            succeeded: 3,
            skipped: 1,
            failed: 2,
            invalidated: 1,
        }
    );
}
