//! Index engine lifecycle: pipeline, commit and refresh, bulk mode, locking

mod common;

use common::*;
use shard_search::engine::{EngineError, IndexEngine, IndexSchema, SearchRequest};
use shard_search::models::{FieldSettings, FieldType, IndexDocumentRequest, IndexSettings};
use shard_search::scheduler::TaskState;
use std::time::Duration;
use tantivy::directory::MmapDirectory;
use tantivy::{Index, IndexWriter};
use tempfile::TempDir;

#[tokio::test]
async fn test_zero_shards_is_fatal() {
    let dir = TempDir::new().unwrap();
    let mut settings = contacts_settings(1);
    settings.shards = 0;

    let result = IndexEngine::initialize(settings, dir.path()).await;
    assert!(matches!(result, Err(EngineError::Settings(_))));
}

#[tokio::test]
async fn test_documents_visible_after_commit_and_refresh() {
    let dir = TempDir::new().unwrap();
    let engine = open_contacts(dir.path(), 3).await;

    for i in 0..30 {
        engine
            .enqueue(contact(&format!("c{}", i), "Jane Doe", "Paris"))
            .await
            .unwrap();
    }
    engine.flush().await;

    let counts = engine.counts();
    assert_eq!(counts.ram, 30);
    assert_eq!(counts.total, 0);
    let rows = engine
        .search(SearchRequest::new("jane", 50), "search")
        .await
        .unwrap();
    assert!(rows.is_empty());

    engine.commit().await.unwrap();
    engine.refresh().await.unwrap();

    let counts = engine.counts();
    assert_eq!(counts.total, 30);
    assert_eq!(counts.ram, 0);
    let rows = engine
        .search(SearchRequest::new("jane", 50), "search")
        .await
        .unwrap();
    assert_eq!(rows.len(), 30);

    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_documents_land_on_their_routed_shard() {
    let dir = TempDir::new().unwrap();
    let engine = open_contacts(dir.path(), 4).await;
    let searchers_before = engine.index_searchers().unwrap();
    assert_eq!(searchers_before.len(), 4);

    let ids = ["alpha", "beta", "gamma", "delta", "epsilon"];
    for id in ids {
        engine.enqueue(contact(id, "Jane", "Oslo")).await.unwrap();
    }
    make_visible(&engine).await;

    let mut expected = [0u64; 4];
    for id in ids {
        expected[engine.shard_for_id(id)] += 1;
    }
    for (ordinal, count) in expected.iter().enumerate() {
        assert_eq!(engine.shard(ordinal).unwrap().counts().total, *count);
    }

    // Same id, same shard: deleting removes the only copy.
    engine
        .enqueue(IndexDocumentRequest::delete("gamma"))
        .await
        .unwrap();
    make_visible(&engine).await;
    assert_eq!(engine.counts().total, 4);

    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_bad_document_does_not_halt_pipeline() {
    let dir = TempDir::new().unwrap();
    let engine = open_contacts(dir.path(), 2).await;

    engine.enqueue(contact("ok-1", "Jane", "Rome")).await.unwrap();
    engine
        .enqueue(IndexDocumentRequest::create(
            "bad",
            fields(&[("name", "Bad"), ("age", "not a number")]),
        ))
        .await
        .unwrap();
    engine
        .enqueue(IndexDocumentRequest::create("  ", fields(&[("name", "Blank id")])))
        .await
        .unwrap();
    engine.enqueue(contact("ok-2", "John", "Rome")).await.unwrap();
    make_visible(&engine).await;

    assert_eq!(engine.counts().total, 2);
    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_bulk_mode_wipes_and_pauses_loops() {
    let dir = TempDir::new().unwrap();
    let engine = open_contacts(dir.path(), 2).await;

    for i in 0..10 {
        engine
            .enqueue(contact(&format!("old{}", i), "Old Entry", "Lyon"))
            .await
            .unwrap();
    }
    make_visible(&engine).await;
    assert_eq!(engine.counts().total, 10);

    engine.bulk_indexing(true).await.unwrap();
    assert!(engine.is_bulk());
    assert_eq!(engine.counts().total, 0);
    assert!(engine
        .search(SearchRequest::new("old", 20), "search")
        .await
        .unwrap()
        .is_empty());

    let refreshes: Vec<u64> = (0..2)
        .map(|ordinal| engine.shard(ordinal).unwrap().refresh_count())
        .collect();
    for ordinal in 0..2 {
        let shard = engine.shard(ordinal).unwrap();
        assert!(shard.is_bulk());
        assert_eq!(shard.commit_task_state(), TaskState::Stopped);
        assert_eq!(shard.refresh_task_state(), TaskState::Stopped);
    }

    for i in 0..5 {
        engine
            .enqueue(contact(&format!("new{}", i), "New Entry", "Nice"))
            .await
            .unwrap();
    }
    engine.flush().await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    for ordinal in 0..2 {
        assert_eq!(engine.shard(ordinal).unwrap().refresh_count(), refreshes[ordinal]);
    }
    assert_eq!(engine.counts().total, 0);

    engine.bulk_indexing(false).await.unwrap();
    assert!(!engine.is_bulk());
    assert_eq!(engine.counts().total, 5);
    for ordinal in 0..2 {
        let shard = engine.shard(ordinal).unwrap();
        assert_eq!(shard.commit_task_state(), TaskState::Running);
        assert_eq!(shard.refresh_task_state(), TaskState::Running);
    }

    let rows = engine
        .search(SearchRequest::new("entry", 20), "search")
        .await
        .unwrap();
    assert_eq!(rows.len(), 5);
    assert!(rows.iter().all(|row| row["id"].starts_with("new")));

    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_abandoned_commit_does_not_stall_pipeline() {
    let dir = TempDir::new().unwrap();
    let engine = open_contacts(dir.path(), 2).await;

    engine.enqueue(contact("a1", "Ann Lee", "Oslo")).await.unwrap();
    {
        let commit = engine.commit();
        futures::pin_mut!(commit);
        let _ = futures::poll!(commit.as_mut());
    }

    engine.enqueue(contact("a2", "Ann Lee", "Oslo")).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), engine.flush())
        .await
        .expect("transforms still gated after the commit was dropped");
    make_visible(&engine).await;
    assert_eq!(engine.counts().total, 2);

    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_abandoned_bulk_switch_still_completes() {
    let dir = TempDir::new().unwrap();
    let engine = open_contacts(dir.path(), 2).await;

    {
        let switch = engine.bulk_indexing(true);
        futures::pin_mut!(switch);
        let _ = futures::poll!(switch.as_mut());
    }

    for _ in 0..100 {
        if engine.is_bulk() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(engine.is_bulk());
    for ordinal in 0..2 {
        let shard = engine.shard(ordinal).unwrap();
        assert!(shard.is_bulk());
        assert_eq!(shard.commit_task_state(), TaskState::Stopped);
    }

    engine.enqueue(contact("b1", "Bo Ek", "Umea")).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), engine.flush())
        .await
        .expect("transforms still gated after the bulk switch was dropped");

    engine.bulk_indexing(false).await.unwrap();
    assert!(!engine.is_bulk());
    for ordinal in 0..2 {
        let shard = engine.shard(ordinal).unwrap();
        assert!(!shard.is_bulk());
        assert_eq!(shard.commit_task_state(), TaskState::Running);
    }
    assert_eq!(engine.counts().total, 1);

    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_second_engine_on_same_directory_is_locked_out() {
    let dir = TempDir::new().unwrap();
    let first = open_contacts(dir.path(), 2).await;

    let settings = contacts_settings(2).validated().unwrap();
    let second = IndexEngine::initialize(settings.clone(), dir.path()).await;
    assert!(matches!(second, Err(EngineError::ShardLocked { shard: 0, .. })));

    first.close().await.unwrap();
    let reopened = IndexEngine::initialize(settings, dir.path()).await.unwrap();
    reopened.close().await.unwrap();
}

#[tokio::test]
async fn test_lock_failure_releases_sibling_shards() {
    let dir = TempDir::new().unwrap();
    let settings = IndexSettings::new("idx", vec![FieldSettings::new("name")])
        .with_shards(2)
        .with_tuning(test_tuning())
        .validated()
        .unwrap();

    // Hold the writer lock of shard 1 from outside the engine.
    let schema = IndexSchema::build(&settings).unwrap();
    let shard_dir = dir.path().join("idx").join("1");
    std::fs::create_dir_all(&shard_dir).unwrap();
    let index = Index::open_or_create(
        MmapDirectory::open(&shard_dir).unwrap(),
        schema.schema().clone(),
    )
    .unwrap();
    let held: IndexWriter = index.writer_with_num_threads(1, 15_000_000).unwrap();

    let result = IndexEngine::initialize(settings.clone(), dir.path()).await;
    assert!(matches!(result, Err(EngineError::ShardLocked { shard: 1, .. })));

    // Shard 0 was opened then released: once the outside writer is gone the
    // whole index opens.
    drop(held);
    let engine = IndexEngine::initialize(settings, dir.path()).await.unwrap();
    assert_eq!(engine.shard_count(), 2);
    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_close_is_idempotent_and_stops_intake() {
    let dir = TempDir::new().unwrap();
    let engine = open_contacts(dir.path(), 2).await;
    engine.enqueue(contact("c1", "Jane", "Bern")).await.unwrap();

    engine.close().await.unwrap();
    engine.close().await.unwrap();
    assert!(engine.is_closed());

    let result = engine.enqueue(contact("c2", "John", "Bern")).await;
    assert!(matches!(result, Err(EngineError::ShutDown(_))));
    assert!(matches!(
        engine.bulk_indexing(true).await,
        Err(EngineError::ShutDown(_))
    ));

    // The final commit persisted the pending document.
    let reopened = open_contacts(dir.path(), 2).await;
    reopened.refresh().await.unwrap();
    assert_eq!(reopened.counts().total, 1);
    reopened.close().await.unwrap();
}

#[tokio::test]
async fn test_typed_fields_are_searchable() {
    let dir = TempDir::new().unwrap();
    let settings = IndexSettings::new(
        "typed",
        vec![
            FieldSettings::new("title"),
            FieldSettings::new("active").with_type(FieldType::Bool),
            FieldSettings::new("price").with_type(FieldType::Float),
            FieldSettings::new("created").with_type(FieldType::Date),
        ],
    )
    .with_tuning(test_tuning())
    .validated()
    .unwrap();
    let engine = IndexEngine::initialize(settings, dir.path()).await.unwrap();

    engine
        .enqueue(IndexDocumentRequest::create(
            "t1",
            fields(&[
                ("title", "Red chair"),
                ("active", "true"),
                ("price", "19.5"),
                ("created", "2024-03-01"),
            ]),
        ))
        .await
        .unwrap();
    make_visible(&engine).await;

    let rows = engine
        .search(
            SearchRequest::new("chair", 10).with_columns(["*"]),
            "search",
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["active"], "true");
    assert_eq!(rows[0]["price"], "19.5");
    assert_eq!(rows[0]["created"], "2024-03-01");

    engine.close().await.unwrap();
}
