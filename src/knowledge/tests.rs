use super::*;
use crate::error::FlowError;
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn unit(dim: usize, axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; dim];
    v[axis] = 1.0;
    v
}

#[test]
fn test_store_then_get_round_trips_content_and_metadata() {
    let store = KnowledgeStore::new(4);
    let entry = KnowledgeEntry::new("ünïcödé content\nwith lines", unit(4, 0), SourceType::Code)
        .with_tag("rust")
        .with_metadata("path", json!("src/lib.rs"))
        .with_metadata("nested", json!({"a": [1, 2, 3], "b": null}));

    let id = store.store(entry.clone()).unwrap();
    let fetched = store.get(&id).unwrap();

    assert_eq!(fetched.content.as_bytes(), entry.content.as_bytes());
    assert_eq!(fetched.metadata, entry.metadata);
    assert_eq!(*fetched, entry);
}

#[test]
fn test_store_rejects_wrong_dimension() {
    let store = KnowledgeStore::new(4);
    let err = store
        .store(KnowledgeEntry::new("x", vec![1.0, 0.0], SourceType::Document))
        .unwrap_err();
    assert_eq!(
        err,
        FlowError::EmbeddingMismatch {
            expected: 4,
            actual: 2
        }
    );
    assert!(store.is_empty());
}

#[test]
fn test_query_rejects_wrong_dimension() {
    let store = KnowledgeStore::new(4);
    assert!(matches!(
        store.query(&[1.0], 3, None),
        Err(FlowError::EmbeddingMismatch { .. })
    ));
}

#[test]
fn test_store_rejects_empty_content_and_duplicate_ids() {
    let store = KnowledgeStore::new(2);
    assert!(
        store
            .store(KnowledgeEntry::new("  ", unit(2, 0), SourceType::Code))
            .is_err()
    );

    let entry = KnowledgeEntry::new("a", unit(2, 0), SourceType::Code).with_id("fixed");
    store.store(entry.clone()).unwrap();
    let err = store.store(entry).unwrap_err();
    assert!(err.to_string().contains("already exists"));
}

#[test]
fn test_store_assigns_id_when_empty() {
    let store = KnowledgeStore::new(2);
    let id = store
        .store(KnowledgeEntry::new("a", unit(2, 0), SourceType::Code).with_id(""))
        .unwrap();
    assert!(!id.is_empty());
    assert!(store.get(&id).is_ok());
}

#[test]
fn test_query_orders_by_descending_similarity() {
    let store = KnowledgeStore::new(3);
    let near = store
        .store(KnowledgeEntry::new("near", vec![1.0, 0.1, 0.0], SourceType::Document))
        .unwrap();
    let far = store
        .store(KnowledgeEntry::new("far", vec![0.0, 0.0, 1.0], SourceType::Document))
        .unwrap();
    let mid = store
        .store(KnowledgeEntry::new("mid", vec![1.0, 1.0, 0.0], SourceType::Document))
        .unwrap();

    let hits = store.query(&[1.0, 0.0, 0.0], 3, None).unwrap();
    let ids: Vec<&str> = hits.iter().map(|h| h.entry.id.as_str()).collect();
    assert_eq!(ids, vec![near.as_str(), mid.as_str(), far.as_str()]);
    assert!(hits[0].score >= hits[1].score);
}

#[test]
fn test_query_ties_prefer_most_recent() {
    let store = KnowledgeStore::new(2);
    let now = Utc::now();
    let mut older = KnowledgeEntry::new("older", unit(2, 0), SourceType::Document);
    older.created_at = now - Duration::seconds(60);
    let mut newer = KnowledgeEntry::new("newer", unit(2, 0), SourceType::Document);
    newer.created_at = now;

    store.store(newer.clone()).unwrap();
    store.store(older.clone()).unwrap();

    let hits = store.query(&unit(2, 0), 2, None).unwrap();
    assert_eq!(hits[0].entry.id, newer.id);
    assert_eq!(hits[1].entry.id, older.id);
}

#[test]
fn test_query_is_idempotent() {
    let store = KnowledgeStore::new(8);
    let embedder = HashingEmbedder::new(8);
    for text in ["alpha beta", "beta gamma", "gamma delta", "alpha", "delta"] {
        store
            .store(KnowledgeEntry::new(text, embedder.embed_sync(text), SourceType::Document))
            .unwrap();
    }

    let query = embedder.embed_sync("alpha gamma");
    let first: Vec<String> = store
        .query(&query, 4, None)
        .unwrap()
        .iter()
        .map(|h| h.entry.id.clone())
        .collect();
    for _ in 0..5 {
        let again: Vec<String> = store
            .query(&query, 4, None)
            .unwrap()
            .iter()
            .map(|h| h.entry.id.clone())
            .collect();
        assert_eq!(again, first);
    }
}

#[test]
fn test_query_filters() {
    let store = KnowledgeStore::new(2);
    store
        .store(
            KnowledgeEntry::new("ok", unit(2, 0), SourceType::SuccessPattern)
                .with_tag("coder")
                .with_metadata("capability", json!("coder")),
        )
        .unwrap();
    store
        .store(
            KnowledgeEntry::new("bad", unit(2, 0), SourceType::FailurePattern)
                .with_tag("coder")
                .with_metadata("capability", json!("coder")),
        )
        .unwrap();
    store
        .store(KnowledgeEntry::new("doc", unit(2, 0), SourceType::Document).with_tag("docs"))
        .unwrap();

    let failures = store
        .query(&unit(2, 0), 10, Some(&KnowledgeFilter::source(SourceType::FailurePattern)))
        .unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].entry.content, "bad");

    let tagged = store
        .query(&unit(2, 0), 10, Some(&KnowledgeFilter::default().with_tag("coder")))
        .unwrap();
    assert_eq!(tagged.len(), 2);

    let by_meta = store
        .query(
            &unit(2, 0),
            10,
            Some(
                &KnowledgeFilter::default()
                    .with_metadata("capability", json!("coder"))
                    .with_source(SourceType::SuccessPattern),
            ),
        )
        .unwrap();
    assert_eq!(by_meta.len(), 1);
    assert_eq!(by_meta[0].entry.content, "ok");
}

#[test]
fn test_superseded_entries_are_hidden() {
    let store = KnowledgeStore::new(2);
    let old = store
        .store(KnowledgeEntry::new("v1", unit(2, 0), SourceType::Document))
        .unwrap();
    let new = store
        .store(KnowledgeEntry::new("v2", unit(2, 0), SourceType::Document).superseding(&old))
        .unwrap();

    let hits = store.query(&unit(2, 0), 5, None).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entry.id, new);

    let all = KnowledgeFilter {
        include_superseded: true,
        ..KnowledgeFilter::default()
    };
    assert_eq!(store.query(&unit(2, 0), 5, Some(&all)).unwrap().len(), 2);
    assert!(store.get(&old).is_ok());
    assert_eq!(store.stats().superseded, 1);
}

#[test]
fn test_find_by_metadata_most_recent_first() {
    let store = KnowledgeStore::new(2);
    let a = store
        .store(KnowledgeEntry::new("a", unit(2, 0), SourceType::Code).with_metadata("task_id", json!("t1")))
        .unwrap();
    let b = store
        .store(KnowledgeEntry::new("b", unit(2, 1), SourceType::Code).with_metadata("task_id", json!("t1")))
        .unwrap();
    store
        .store(KnowledgeEntry::new("c", unit(2, 1), SourceType::Code).with_metadata("task_id", json!("t2")))
        .unwrap();

    let found = store.find_by_metadata("task_id", &json!("t1"));
    let ids: Vec<&str> = found.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec![b.as_str(), a.as_str()]);
}

#[test]
fn test_delete_then_get_is_not_found() {
    let store = KnowledgeStore::new(2);
    let id = store
        .store(KnowledgeEntry::new("gone", unit(2, 0), SourceType::Code))
        .unwrap();
    store.delete(&id).unwrap();

    assert!(matches!(store.get(&id), Err(FlowError::NotFound(_))));
    assert!(matches!(store.delete(&id), Err(FlowError::NotFound(_))));
    assert!(store.query(&unit(2, 0), 5, None).unwrap().is_empty());
}

#[test]
fn test_stats_counts_by_source_type() {
    let store = KnowledgeStore::new(2);
    store
        .store(KnowledgeEntry::new("a", unit(2, 0), SourceType::Code))
        .unwrap();
    store
        .store(KnowledgeEntry::new("b", unit(2, 0), SourceType::Code))
        .unwrap();
    store
        .store(KnowledgeEntry::new("c", unit(2, 0), SourceType::FailurePattern))
        .unwrap();

    let stats = store.stats();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.by_source_type.get("code"), Some(&2));
    assert_eq!(stats.by_source_type.get("failure-pattern"), Some(&1));
}

#[test]
fn test_journal_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("knowledge.ndjson");

    let (kept, removed) = {
        let store = KnowledgeStore::open(&path, 2).unwrap();
        let kept = store
            .store(KnowledgeEntry::new("kept", unit(2, 0), SourceType::Document).with_tag("t"))
            .unwrap();
        let removed = store
            .store(KnowledgeEntry::new("removed", unit(2, 1), SourceType::Document))
            .unwrap();
        store.delete(&removed).unwrap();
        (kept, removed)
    };

    let reopened = KnowledgeStore::open(&path, 2).unwrap();
    assert_eq!(reopened.len(), 1);
    assert_eq!(reopened.get(&kept).unwrap().content, "kept");
    assert!(reopened.get(&removed).is_err());
}

#[test]
fn test_reopen_with_other_dimension_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("knowledge.ndjson");
    {
        let store = KnowledgeStore::open(&path, 2).unwrap();
        store
            .store(KnowledgeEntry::new("x", unit(2, 0), SourceType::Code))
            .unwrap();
    }
    assert!(matches!(
        KnowledgeStore::open(&path, 3),
        Err(FlowError::EmbeddingMismatch { expected: 3, actual: 2 })
    ));
}

#[test]
fn test_concurrent_writers_and_readers() {
    let store = Arc::new(KnowledgeStore::new(4));

    std::thread::scope(|scope| {
        for w in 0..4 {
            let store = Arc::clone(&store);
            scope.spawn(move || {
                for i in 0..25 {
                    store
                        .store(KnowledgeEntry::new(
                            format!("w{}-{}", w, i),
                            unit(4, (w + i) % 4),
                            SourceType::Code,
                        ))
                        .unwrap();
                }
            });
        }
        for _ in 0..4 {
            let store = Arc::clone(&store);
            scope.spawn(move || {
                for _ in 0..25 {
                    let hits = store.query(&unit(4, 0), 5, None).unwrap();
                    assert!(hits.len() <= 5);
                }
            });
        }
    });

    assert_eq!(store.len(), 100);
}

#[tokio::test]
async fn test_store_retriever_embeds_query_text() {
    let store = Arc::new(KnowledgeStore::new(64));
    let embedder = Arc::new(HashingEmbedder::new(64));
    for text in ["retry with exponential backoff", "render html templates"] {
        store
            .store(KnowledgeEntry::new(text, embedder.embed(text).await.unwrap(), SourceType::Document))
            .unwrap();
    }

    let retriever = StoreRetriever::new(Arc::clone(&store), embedder);
    let hits = retriever
        .retrieve("exponential backoff for retries", 1, None)
        .await
        .unwrap();
    assert_eq!(hits[0].entry.content, "retry with exponential backoff");
}
