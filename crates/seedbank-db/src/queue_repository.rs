//! Processing queue backed by the `queue_jobs` table.
//!
//! Implements [`ItemNotifier`]: every publish enqueues one pending job on the
//! [`PROCESS_ITEMS_QUEUE`] whose payload lists the committed info hashes.
//! Consumers claim jobs elsewhere; this side only inserts.

use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres};
use tracing::debug;
use uuid::Uuid;

use seedbank_core::error::AppError;
use seedbank_core::models::InfoHash;
use seedbank_core::traits::ItemNotifier;

/// Queue that downstream item processing consumes.
pub const PROCESS_ITEMS_QUEUE: &str = "process_items";

/// PostgreSQL implementation of the item notifier.
#[derive(Clone)]
pub struct QueueRepository {
    pool: Pool<Postgres>,
}

impl QueueRepository {
    /// Create a new queue repository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// =============================================================================
// Helper Types for Database Mapping
// =============================================================================

/// JSON payload of a `process_items` job.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
struct ProcessItemsPayload {
    info_hashes: Vec<String>,
}

impl ProcessItemsPayload {
    fn new(info_hashes: &[InfoHash]) -> Self {
        Self {
            info_hashes: info_hashes.iter().map(InfoHash::to_hex).collect(),
        }
    }
}

// =============================================================================
// ItemNotifier Trait Implementation
// =============================================================================

impl ItemNotifier for QueueRepository {
    async fn publish(&self, info_hashes: &[InfoHash]) -> Result<Uuid, AppError> {
        let payload = ProcessItemsPayload::new(info_hashes);

        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO queue_jobs (queue, status, payload)
            VALUES ($1, 'pending', $2)
            RETURNING id
            "#,
        )
        .bind(PROCESS_ITEMS_QUEUE)
        .bind(Json(&payload))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::PublishError(e.to_string()))?;

        debug!(job_id = %id, items = info_hashes.len(), "Processing job enqueued");
        Ok(id)
    }
}
