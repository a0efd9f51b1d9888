//! Test utilities for integration tests.
//!
//! Provides helper functions to set up isolated PostgreSQL containers
//! with the seedbank schema applied.

use chrono::{DateTime, Utc};
use seedbank_core::models::{ImportInfo, InfoHash, Item, Record, Source};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

/// Workspace schema, applied as one multi-statement script.
const SCHEMA: &str = include_str!("../../../../migrations/0001_init.sql");

/// Sets up a PostgreSQL container and returns a connection pool.
///
/// Each call creates a fresh, isolated database container. The container is
/// automatically cleaned up when the returned `ContainerAsync` is dropped.
///
/// # Returns
///
/// A tuple of (PgPool, ContainerAsync) - keep the container alive for the test duration.
pub async fn setup_test_db() -> (PgPool, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("postgres", "16-alpine")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "postgres")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let connection_string = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

    // The server restarts once after initdb, so early connections may be refused.
    const MAX_RETRIES: u32 = 30;
    let mut retries = 0;
    let pool = loop {
        match PgPoolOptions::new()
            .max_connections(5)
            .connect(&connection_string)
            .await
        {
            Ok(pool) => break pool,
            Err(e) => {
                retries += 1;
                if retries >= MAX_RETRIES {
                    panic!(
                        "Failed to connect to database after {} retries: {}",
                        MAX_RETRIES, e
                    );
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    };

    sqlx::raw_sql(SCHEMA)
        .execute(&pool)
        .await
        .expect("Failed to apply schema");

    (pool, container)
}

pub fn hash(n: u32) -> InfoHash {
    let mut bytes = [0xcdu8; 20];
    bytes[..4].copy_from_slice(&n.to_be_bytes());
    InfoHash::from_bytes(bytes)
}

pub fn published_at() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp")
}

/// Creates a sample record from `source` whose info hash is derived from `n`.
pub fn sample_record(source: &str, n: u32) -> Record {
    Record {
        source: source.to_string(),
        info_hash: hash(n),
        name: format!("Sample {}", n),
        size: 4_096 + n as u64,
        private: false,
        enrichment: None,
        published_at: published_at(),
    }
}

/// Builds the item an import named `import_id` writes for `record`.
pub fn sample_item(import_id: &str, record: &Record) -> Item {
    Item::from_record(&ImportInfo::new(import_id), record)
}

pub fn sources(keys: &[&str]) -> Vec<Source> {
    keys.iter().map(|key| Source::from_key(key)).collect()
}

pub async fn count(pool: &PgPool, table: &str) -> i64 {
    let (n,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .expect("count query should succeed");
    n
}
