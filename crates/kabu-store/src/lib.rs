//! # kabu-store
//!
//! Transactional document store backing the booking and chat core.
//!
//! Documents are JSON bodies addressed by `collection/id` paths and persisted
//! in SQLite.  The crate exposes a [`Database`] handle providing single-
//! document reads/writes, filtered queries, multi-document transactions with
//! optimistic concurrency (reads record versions, commits validate and retry),
//! and live snapshot subscriptions that re-deliver the full matching set of a
//! query after every commit touching its collection.

pub mod database;
pub mod migrations;
pub mod models;
pub mod query;
pub mod subscribe;
pub mod transaction;

mod documents;
mod error;

pub use database::{CommitEvent, Database};
pub use documents::DocPath;
pub use error::StoreError;
pub use models::*;
pub use query::{Direction, Filter, Query};
pub use subscribe::{Snapshot, Subscription};
pub use transaction::Transaction;
