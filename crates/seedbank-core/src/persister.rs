//! Batch persistence for import sessions.
//!
//! Persisting a batch is a three step saga with no transaction spanning the
//! steps:
//!
//! ```text
//! 1. create-or-ignore sources not yet durable in this session
//! 2. create-or-update one item per record, keyed by info hash
//! 3. publish the batch's info hashes to the processing queue
//! ```
//!
//! A failure at any step aborts the rest of the batch but leaves earlier
//! steps committed. Every step is idempotent, so writing the same records
//! again later is safe.

use std::collections::HashSet;

use tracing::debug;

use crate::error::AppError;
use crate::models::{ImportInfo, InfoHash, Item, Record, Source};
use crate::traits::{ImportStore, ItemNotifier};

/// Writes batches of records for one import.
///
/// Tracks which source keys have been committed so each is written at most
/// once per session after its first successful batch.
pub struct BatchPersister<S, N>
where
    S: ImportStore,
    N: ItemNotifier,
{
    store: S,
    notifier: N,
    info: ImportInfo,
    durable_sources: HashSet<String>,
}

impl<S, N> BatchPersister<S, N>
where
    S: ImportStore,
    N: ItemNotifier,
{
    pub fn new(store: S, notifier: N, info: ImportInfo) -> Self {
        Self {
            store,
            notifier,
            info,
            durable_sources: HashSet::new(),
        }
    }

    pub fn info(&self) -> &ImportInfo {
        &self.info
    }

    /// Returns true once a batch containing `key` has fully committed.
    pub fn is_durable(&self, key: &str) -> bool {
        self.durable_sources.contains(key)
    }

    /// Persists a batch and returns the info hashes it committed, in input order.
    ///
    /// # Errors
    ///
    /// - `AppError::InvalidRecord` if any record fails validation; nothing is written
    /// - Any error from the store or notifier, unchanged
    pub async fn persist(&mut self, records: &[Record]) -> Result<Vec<InfoHash>, AppError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        for record in records {
            record.validate()?;
        }

        let new_sources = self.new_sources(records);
        let items: Vec<Item> = records
            .iter()
            .map(|record| Item::from_record(&self.info, record))
            .collect();
        let info_hashes: Vec<InfoHash> = records.iter().map(|r| r.info_hash).collect();

        if !new_sources.is_empty() {
            self.store.create_sources(&new_sources).await?;
            debug!(
                import_id = %self.info.id,
                count = new_sources.len(),
                "Created sources"
            );
        }

        self.store.upsert_items(&items).await?;

        let job_id = self.notifier.publish(&info_hashes).await?;
        debug!(
            import_id = %self.info.id,
            %job_id,
            items = info_hashes.len(),
            "Published items for processing"
        );

        self.durable_sources
            .extend(new_sources.into_iter().map(|source| source.key));

        Ok(info_hashes)
    }

    /// Sources in `records` that are neither durable nor repeated earlier in the batch.
    fn new_sources(&self, records: &[Record]) -> Vec<Source> {
        let mut seen: HashSet<&str> = HashSet::new();
        records
            .iter()
            .filter(|record| !self.durable_sources.contains(&record.source))
            .filter(|record| seen.insert(record.source.as_str()))
            .map(|record| Source::from_key(&record.source))
            .collect()
    }
}
