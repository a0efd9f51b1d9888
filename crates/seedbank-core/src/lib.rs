//! Seedbank Core - Domain types, batch persistence and import sessions.
//!
//! This crate provides the core functionality for seedbank, including:
//!
//! - **Domain models**: [`Record`], [`InfoHash`], [`Item`], [`Source`], etc.
//! - **Persistence**: [`BatchPersister`] writes a batch of records as sources,
//!   items and a processing notification
//! - **Sessions**: [`Importer`] starts [`ImportSession`]s that buffer records
//!   from concurrent producers and flush them by size or by time
//! - **Traits**: [`ImportStore`], [`ItemNotifier`] for dependency injection
//!
//! # Architecture
//!
//! This crate is designed to be reusable by different frontends (CLI, HTTP
//! import endpoints, crawlers). Storage and queueing are decoupled from the
//! session through traits:
//!
//! - [`ImportStore`] - abstracts source and item persistence (e.g., PostgreSQL)
//! - [`ItemNotifier`] - abstracts the downstream processing queue
//!
//! # Example
//!
//! ```ignore
//! use seedbank_core::{ImportConfig, ImportInfo, Importer};
//! use tokio_util::sync::CancellationToken;
//!
//! let importer = Importer::with_config(store, queue, ImportConfig::default());
//! let session = importer.start(ImportInfo::new("nightly"), &CancellationToken::new());
//!
//! session.ingest(records).await?;
//! session.close().await?;
//! println!("{} items committed", session.committed_fingerprints().len());
//! ```

pub mod config;
pub mod error;
pub mod error_log;
pub mod import;
pub mod models;
pub mod persister;
pub mod traits;

// Configuration
pub use config::{DbConfig, ImportConfig};

// Error handling
pub use error::{AppError, BatchFailure, ImportErrors};
pub use error_log::ErrorLog;

// Domain models
pub use models::{
    ContentType, Enrichment, Episodes, FilesStatus, ImportInfo, InfoHash, Item, ItemHint,
    ItemSource, Record, Source,
};

// Traits for dependency injection
pub use traits::{ImportStore, ItemNotifier};

// Services (generic over trait implementations)
pub use import::{ImportSession, Importer};
pub use persister::BatchPersister;
