//! Item repository for PostgreSQL.
//!
//! Writes are multi-row `INSERT ... ON CONFLICT` statements built with
//! [`QueryBuilder`], issued in chunks of [`CHUNK_SIZE`] rows so a single
//! statement stays well under the PostgreSQL bind parameter limit.

use std::collections::HashMap;

use seedbank_core::error::AppError;
use seedbank_core::models::{InfoHash, Item, ItemHint, ItemSource, Source};
use seedbank_core::traits::ImportStore;
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres, QueryBuilder, Transaction};
use tracing::debug;

/// Rows per INSERT statement.
const CHUNK_SIZE: usize = 100;

/// Repository for sources and items.
///
/// # Examples
///
/// ```no_run
/// use sqlx::postgres::PgPoolOptions;
/// use seedbank_db::ItemRepository;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = PgPoolOptions::new()
///     .max_connections(5)
///     .connect("postgresql://localhost/seedbank")
///     .await?;
///
/// let repo = ItemRepository::new(pool);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ItemRepository {
    pool: Pool<Postgres>,
}

impl ItemRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts sources, leaving existing keys untouched.
    pub async fn create_sources(&self, sources: &[Source]) -> Result<(), AppError> {
        if sources.is_empty() {
            return Ok(());
        }

        for chunk in sources.chunks(CHUNK_SIZE) {
            let mut query = QueryBuilder::<Postgres>::new("INSERT INTO sources (key, name) ");
            query.push_values(chunk, |mut row, source| {
                row.push_bind(source.key.as_str())
                    .push_bind(source.name.as_str());
            });
            query.push(" ON CONFLICT (key) DO NOTHING");

            query
                .build()
                .execute(&self.pool)
                .await
                .map_err(AppError::DatabaseError)?;
        }

        debug!(count = sources.len(), "Sources created");
        Ok(())
    }

    /// Creates or overwrites items together with their sources and hints.
    ///
    /// Runs in a single transaction. When the same info hash appears more
    /// than once, the last occurrence wins.
    pub async fn upsert_items(&self, items: &[Item]) -> Result<(), AppError> {
        let items = last_occurrences(items);
        if items.is_empty() {
            return Ok(());
        }
        let sizes = item_sizes(&items)?;

        let mut tx = self.pool.begin().await.map_err(AppError::DatabaseError)?;

        for (chunk, sizes) in items.chunks(CHUNK_SIZE).zip(sizes.chunks(CHUNK_SIZE)) {
            insert_items(&mut tx, chunk, sizes).await?;
        }

        let sources = item_sources(&items);
        for chunk in sources.chunks(CHUNK_SIZE) {
            insert_item_sources(&mut tx, chunk).await?;
        }

        let (hinted, unhinted): (Vec<&Item>, Vec<&Item>) =
            items.iter().copied().partition(|item| item.hint.is_some());
        for chunk in hinted.chunks(CHUNK_SIZE) {
            insert_item_hints(&mut tx, chunk).await?;
        }
        if !unhinted.is_empty() {
            delete_item_hints(&mut tx, &unhinted).await?;
        }

        tx.commit().await.map_err(AppError::DatabaseError)?;

        debug!(
            items = items.len(),
            hinted = hinted.len(),
            "Items upserted"
        );
        Ok(())
    }

    /// Checks database connectivity by executing a simple query.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(())
    }
}

// =============================================================================
// Statements
// =============================================================================

async fn insert_items(
    tx: &mut Transaction<'_, Postgres>,
    items: &[&Item],
    sizes: &[i64],
) -> Result<(), AppError> {
    let mut query = QueryBuilder::<Postgres>::new(
        "INSERT INTO items (info_hash, name, size, private, files_status) ",
    );
    query.push_values(items.iter().zip(sizes), |mut row, (item, size)| {
        row.push_bind(item.info_hash.as_bytes().to_vec())
            .push_bind(item.name.as_str())
            .push_bind(*size)
            .push_bind(item.private)
            .push_bind(item.files_status.as_str());
    });
    query.push(
        r#" ON CONFLICT (info_hash) DO UPDATE SET
            name = EXCLUDED.name,
            size = EXCLUDED.size,
            private = EXCLUDED.private,
            files_status = EXCLUDED.files_status,
            updated_at = NOW()"#,
    );

    query
        .build()
        .execute(&mut **tx)
        .await
        .map_err(AppError::DatabaseError)?;
    Ok(())
}

async fn insert_item_sources(
    tx: &mut Transaction<'_, Postgres>,
    sources: &[(InfoHash, &ItemSource)],
) -> Result<(), AppError> {
    let mut query = QueryBuilder::<Postgres>::new(
        "INSERT INTO item_sources (info_hash, source, import_id, published_at) ",
    );
    query.push_values(sources, |mut row, (info_hash, source)| {
        row.push_bind(info_hash.as_bytes().to_vec())
            .push_bind(source.source.as_str())
            .push_bind(source.import_id.as_deref())
            .push_bind(source.published_at);
    });
    query.push(
        r#" ON CONFLICT (info_hash, source) DO UPDATE SET
            import_id = EXCLUDED.import_id,
            published_at = EXCLUDED.published_at,
            updated_at = NOW()"#,
    );

    query
        .build()
        .execute(&mut **tx)
        .await
        .map_err(AppError::DatabaseError)?;
    Ok(())
}

async fn insert_item_hints(
    tx: &mut Transaction<'_, Postgres>,
    items: &[&Item],
) -> Result<(), AppError> {
    let hints: Vec<(&InfoHash, &ItemHint)> = items
        .iter()
        .filter_map(|item| item.hint.as_ref().map(|hint| (&item.info_hash, hint)))
        .collect();

    let mut query = QueryBuilder::<Postgres>::new(
        r#"INSERT INTO item_hints (
            info_hash, content_type, content_source, content_id, title,
            release_date, release_year, episodes, video_resolution, video_source,
            video_codec, video_3d, video_modifier, release_group
        ) "#,
    );
    query.push_values(hints, |mut row, (info_hash, hint)| {
        row.push_bind(info_hash.as_bytes().to_vec())
            .push_bind(hint.content_type.as_str())
            .push_bind(hint.content_source.as_deref())
            .push_bind(hint.content_id.as_deref())
            .push_bind(hint.title.as_deref())
            .push_bind(hint.release_date)
            .push_bind(hint.release_year.map(i32::from))
            .push_bind(hint.episodes.clone().map(Json))
            .push_bind(hint.video_resolution.map(|v| v.as_str()))
            .push_bind(hint.video_source.map(|v| v.as_str()))
            .push_bind(hint.video_codec.map(|v| v.as_str()))
            .push_bind(hint.video_3d.map(|v| v.as_str()))
            .push_bind(hint.video_modifier.map(|v| v.as_str()))
            .push_bind(hint.release_group.as_deref());
    });
    query.push(
        r#" ON CONFLICT (info_hash) DO UPDATE SET
            content_type = EXCLUDED.content_type,
            content_source = EXCLUDED.content_source,
            content_id = EXCLUDED.content_id,
            title = EXCLUDED.title,
            release_date = EXCLUDED.release_date,
            release_year = EXCLUDED.release_year,
            episodes = EXCLUDED.episodes,
            video_resolution = EXCLUDED.video_resolution,
            video_source = EXCLUDED.video_source,
            video_codec = EXCLUDED.video_codec,
            video_3d = EXCLUDED.video_3d,
            video_modifier = EXCLUDED.video_modifier,
            release_group = EXCLUDED.release_group,
            updated_at = NOW()"#,
    );

    query
        .build()
        .execute(&mut **tx)
        .await
        .map_err(AppError::DatabaseError)?;
    Ok(())
}

/// Removes hints left over from an earlier import of now un-hinted items.
async fn delete_item_hints(
    tx: &mut Transaction<'_, Postgres>,
    items: &[&Item],
) -> Result<(), AppError> {
    let info_hashes: Vec<Vec<u8>> = items
        .iter()
        .map(|item| item.info_hash.as_bytes().to_vec())
        .collect();

    sqlx::query("DELETE FROM item_hints WHERE info_hash = ANY($1)")
        .bind(info_hashes)
        .execute(&mut **tx)
        .await
        .map_err(AppError::DatabaseError)?;
    Ok(())
}

// =============================================================================
// Row preparation
// =============================================================================

/// Keeps the last item for each info hash, at the position of its first
/// occurrence.
///
/// A single `ON CONFLICT DO UPDATE` statement cannot touch the same row twice.
fn last_occurrences(items: &[Item]) -> Vec<&Item> {
    let mut positions: HashMap<InfoHash, usize> = HashMap::with_capacity(items.len());
    let mut unique: Vec<&Item> = Vec::with_capacity(items.len());
    for item in items {
        match positions.get(&item.info_hash) {
            Some(&index) => unique[index] = item,
            None => {
                positions.insert(item.info_hash, unique.len());
                unique.push(item);
            }
        }
    }
    unique
}

/// Item sizes as PostgreSQL `BIGINT`s.
fn item_sizes(items: &[&Item]) -> Result<Vec<i64>, AppError> {
    items
        .iter()
        .map(|item| {
            i64::try_from(item.size).map_err(|_| {
                AppError::InvalidRecord(format!("size too large for {}: {}", item.info_hash, item.size))
            })
        })
        .collect()
}

/// Flattens provenance entries, keeping the last entry per `(info_hash, source)`.
fn item_sources<'a>(items: &[&'a Item]) -> Vec<(InfoHash, &'a ItemSource)> {
    let mut positions: HashMap<(InfoHash, &str), usize> = HashMap::new();
    let mut rows: Vec<(InfoHash, &'a ItemSource)> = Vec::new();
    for item in items {
        for source in &item.sources {
            let key = (item.info_hash, source.source.as_str());
            match positions.get(&key) {
                Some(&index) => rows[index] = (item.info_hash, source),
                None => {
                    positions.insert(key, rows.len());
                    rows.push((item.info_hash, source));
                }
            }
        }
    }
    rows
}

impl ImportStore for ItemRepository {
    async fn create_sources(&self, sources: &[Source]) -> Result<(), AppError> {
        ItemRepository::create_sources(self, sources).await
    }

    async fn upsert_items(&self, items: &[Item]) -> Result<(), AppError> {
        ItemRepository::upsert_items(self, items).await
    }
}
