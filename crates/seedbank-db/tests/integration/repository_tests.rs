//! Integration tests for ItemRepository and QueueRepository.
//!
//! These tests verify the repository layer against a real PostgreSQL
//! database. Each test runs in an isolated container.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use seedbank_core::models::{ContentType, Enrichment, ImportInfo, Source, VideoResolution};
use seedbank_core::traits::ItemNotifier;
use seedbank_core::{ImportConfig, Importer};
use seedbank_db::{ItemRepository, PROCESS_ITEMS_QUEUE, QueueRepository};
use tokio_util::sync::CancellationToken;

use crate::integration::common::{
    count, hash, sample_item, sample_record, setup_test_db, sources,
};

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_health_check_succeeds() {
    let (pool, _container) = setup_test_db().await;
    let repo = ItemRepository::new(pool.clone());

    repo.health_check().await.expect("health check should succeed");

    pool.close().await;
    assert!(
        repo.health_check().await.is_err(),
        "closed pool must fail the health check"
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_create_sources_ignores_existing_keys() {
    let (pool, _container) = setup_test_db().await;
    let repo = ItemRepository::new(pool.clone());

    repo.create_sources(&sources(&["dht"]))
        .await
        .expect("create should succeed");
    repo.create_sources(&[
        Source {
            key: "dht".to_string(),
            name: "renamed".to_string(),
        },
        Source::from_key("rss"),
    ])
    .await
    .expect("create with existing key should succeed");

    let (name,): (String,) = sqlx::query_as("SELECT name FROM sources WHERE key = 'dht'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(name, "dht", "existing source must not be modified");
    assert_eq!(count(&pool, "sources").await, 2);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_create_sources_spans_multiple_chunks() {
    let (pool, _container) = setup_test_db().await;
    let repo = ItemRepository::new(pool.clone());

    let many: Vec<Source> = (0..250)
        .map(|n| Source::from_key(&format!("source-{}", n)))
        .collect();
    repo.create_sources(&many).await.expect("create should succeed");

    assert_eq!(count(&pool, "sources").await, 250);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_upsert_items_inserts_item_and_provenance() {
    let (pool, _container) = setup_test_db().await;
    let repo = ItemRepository::new(pool.clone());
    let record = sample_record("dht", 1);

    repo.create_sources(&sources(&["dht"])).await.unwrap();
    repo.upsert_items(&[sample_item("import-1", &record)])
        .await
        .expect("upsert should succeed");

    let (name, size, private, files_status): (String, i64, bool, String) = sqlx::query_as(
        "SELECT name, size, private, files_status FROM items WHERE info_hash = $1",
    )
    .bind(hash(1).as_bytes().to_vec())
    .fetch_one(&pool)
    .await
    .expect("item should exist");
    assert_eq!(name, "Sample 1");
    assert_eq!(size, 4_097);
    assert!(!private);
    assert_eq!(files_status, "no_info");

    let (source, import_id): (String, Option<String>) = sqlx::query_as(
        "SELECT source, import_id FROM item_sources WHERE info_hash = $1",
    )
    .bind(hash(1).as_bytes().to_vec())
    .fetch_one(&pool)
    .await
    .expect("provenance should exist");
    assert_eq!(source, "dht");
    assert_eq!(import_id.as_deref(), Some("import-1"));
    assert_eq!(count(&pool, "item_hints").await, 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_upsert_items_overwrites_existing_rows() {
    let (pool, _container) = setup_test_db().await;
    let repo = ItemRepository::new(pool.clone());

    repo.create_sources(&sources(&["dht"])).await.unwrap();
    repo.upsert_items(&[sample_item("import-1", &sample_record("dht", 1))])
        .await
        .unwrap();

    let mut updated = sample_record("dht", 1);
    updated.name = "Renamed".to_string();
    updated.private = true;
    repo.upsert_items(&[sample_item("import-2", &updated)])
        .await
        .expect("second upsert should succeed");

    let (name, private): (String, bool) =
        sqlx::query_as("SELECT name, private FROM items WHERE info_hash = $1")
            .bind(hash(1).as_bytes().to_vec())
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(name, "Renamed");
    assert!(private);

    let (import_id,): (Option<String>,) =
        sqlx::query_as("SELECT import_id FROM item_sources WHERE info_hash = $1")
            .bind(hash(1).as_bytes().to_vec())
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(import_id.as_deref(), Some("import-2"));
    assert_eq!(count(&pool, "items").await, 1);
    assert_eq!(count(&pool, "item_sources").await, 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_duplicate_info_hashes_in_one_call_keep_last() {
    let (pool, _container) = setup_test_db().await;
    let repo = ItemRepository::new(pool.clone());

    let mut second = sample_record("dht", 7);
    second.name = "Second".to_string();

    repo.create_sources(&sources(&["dht"])).await.unwrap();
    repo.upsert_items(&[
        sample_item("import-1", &sample_record("dht", 7)),
        sample_item("import-1", &second),
    ])
    .await
    .expect("duplicates must not fail the statement");

    let (name,): (String,) = sqlx::query_as("SELECT name FROM items WHERE info_hash = $1")
        .bind(hash(7).as_bytes().to_vec())
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(name, "Second");
    assert_eq!(count(&pool, "items").await, 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_hints_follow_enrichment() {
    let (pool, _container) = setup_test_db().await;
    let repo = ItemRepository::new(pool.clone());

    let mut enrichment = Enrichment::new(ContentType::TvShow);
    enrichment.title = Some("The Expanse".to_string());
    enrichment.content_source = Some("tmdb".to_string());
    enrichment.content_id = Some("63639".to_string());
    enrichment.release_year = Some(2015);
    enrichment.video_resolution = Some(VideoResolution::V1080p);
    enrichment.episodes = Some(BTreeMap::from([(1, BTreeSet::from([1, 2, 3]))]));
    let mut record = sample_record("dht", 3);
    record.enrichment = Some(enrichment);

    repo.create_sources(&sources(&["dht"])).await.unwrap();
    repo.upsert_items(&[sample_item("import-1", &record)])
        .await
        .expect("upsert with hint should succeed");

    let (content_type, title, year, resolution, episodes): (
        String,
        Option<String>,
        Option<i32>,
        Option<String>,
        Option<serde_json::Value>,
    ) = sqlx::query_as(
        "SELECT content_type, title, release_year, video_resolution, episodes \
         FROM item_hints WHERE info_hash = $1",
    )
    .bind(hash(3).as_bytes().to_vec())
    .fetch_one(&pool)
    .await
    .expect("hint should exist");
    assert_eq!(content_type, "tv_show");
    assert_eq!(title.as_deref(), Some("The Expanse"));
    assert_eq!(year, Some(2015));
    assert_eq!(resolution.as_deref(), Some("V1080p"));
    assert_eq!(episodes, Some(serde_json::json!({ "1": [1, 2, 3] })));

    // Re-importing without enrichment drops the stale hint.
    record.enrichment = None;
    repo.upsert_items(&[sample_item("import-2", &record)])
        .await
        .unwrap();
    assert_eq!(count(&pool, "item_hints").await, 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_upsert_items_without_source_rolls_back() {
    let (pool, _container) = setup_test_db().await;
    let repo = ItemRepository::new(pool.clone());

    let result = repo
        .upsert_items(&[sample_item("import-1", &sample_record("missing", 1))])
        .await;

    assert!(result.is_err(), "provenance requires an existing source");
    assert_eq!(count(&pool, "items").await, 0, "transaction rolled back");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_publish_enqueues_pending_job() {
    let (pool, _container) = setup_test_db().await;
    let queue = QueueRepository::new(pool.clone());

    let id = queue
        .publish(&[hash(1), hash(2)])
        .await
        .expect("publish should succeed");

    let (queue_name, status, payload): (String, String, serde_json::Value) =
        sqlx::query_as("SELECT queue, status, payload FROM queue_jobs WHERE id = $1")
            .bind(id)
            .fetch_one(&pool)
            .await
            .expect("job should exist");
    assert_eq!(queue_name, PROCESS_ITEMS_QUEUE);
    assert_eq!(status, "pending");
    assert_eq!(
        payload,
        serde_json::json!({ "info_hashes": [hash(1).to_hex(), hash(2).to_hex()] })
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_session_imports_into_postgres() {
    let (pool, _container) = setup_test_db().await;
    let config = ImportConfig::default()
        .with_buffer_size(100)
        .with_max_wait(Duration::from_secs(30));
    let importer = Importer::with_config(
        ItemRepository::new(pool.clone()),
        QueueRepository::new(pool.clone()),
        config,
    );
    let session = importer.start(ImportInfo::new("import-1"), &CancellationToken::new());

    let records: Vec<_> = (0..250)
        .map(|n| sample_record(if n % 2 == 0 { "dht" } else { "rss" }, n))
        .collect();
    session.ingest(records).await.expect("ingest should succeed");
    session.close().await.expect("import should succeed");

    assert_eq!(session.committed_fingerprints().len(), 250);
    assert_eq!(count(&pool, "sources").await, 2);
    assert_eq!(count(&pool, "items").await, 250);
    assert_eq!(count(&pool, "item_sources").await, 250);
    assert_eq!(count(&pool, "queue_jobs").await, 3, "two full batches and a final one");
}
