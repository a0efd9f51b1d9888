//! Seedbank DB - PostgreSQL persistence for import sessions
//!
//! This crate implements the storage and queue traits from `seedbank-core`
//! on top of `sqlx`.
//!
//! # Overview
//!
//! The main components are:
//! - [`ItemRepository`] - Sources, items, item provenance and hints
//! - [`QueueRepository`] - Processing queue notified of committed items
//!
//! The schema lives in `migrations/0001_init.sql` at the workspace root.

mod item_repository;
mod queue_repository;

pub use item_repository::ItemRepository;
pub use queue_repository::{PROCESS_ITEMS_QUEUE, QueueRepository};
