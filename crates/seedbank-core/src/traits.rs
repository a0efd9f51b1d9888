//! Trait definitions for external dependencies.
//!
//! An import session only needs two collaborators: somewhere durable to
//! write sources and items, and a queue to tell downstream processing which
//! items were committed. Abstracting both enables:
//!
//! - **Testability**: In-memory implementations with failure injection
//! - **Flexibility**: PostgreSQL today, other backends later
//! - **Decoupling**: Session logic doesn't depend on SQL
//!
//! # Example
//!
//! ```
//! use seedbank_core::models::{InfoHash, Item};
//! use seedbank_core::traits::{ImportStore, ItemNotifier};
//! use seedbank_core::AppError;
//!
//! async fn write_and_announce<S, N>(store: &S, queue: &N, items: &[Item]) -> Result<(), AppError>
//! where
//!     S: ImportStore,
//!     N: ItemNotifier,
//! {
//!     store.upsert_items(items).await?;
//!     let hashes: Vec<InfoHash> = items.iter().map(|i| i.info_hash).collect();
//!     queue.publish(&hashes).await?;
//!     Ok(())
//! }
//! ```

use std::future::Future;

use uuid::Uuid;

use crate::AppError;
use crate::models::{InfoHash, Item, Source};

/// Store for sources and items.
///
/// Both operations must be safe to repeat: a batch whose later phase failed
/// may be written again by a subsequent import.
pub trait ImportStore: Send + Sync + Clone + 'static {
    /// Creates the given sources, ignoring keys that already exist.
    fn create_sources(
        &self,
        sources: &[Source],
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Creates or fully overwrites items keyed by info hash.
    fn upsert_items(&self, items: &[Item]) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Downstream queue notified of committed items.
///
/// Delivery is at-least-once; consumers must tolerate repeats.
pub trait ItemNotifier: Send + Sync + Clone + 'static {
    /// Enqueues processing of the given items.
    ///
    /// # Returns
    ///
    /// The id of the enqueued job, acknowledging the publish.
    fn publish(
        &self,
        info_hashes: &[InfoHash],
    ) -> impl Future<Output = Result<Uuid, AppError>> + Send;
}
