//! Conclave document store adapter.
//!
//! A thin abstraction over a replicating document database. Each participant
//! process owns a [`DbRegistry`] of named [`Database`] replicas; writes are
//! acknowledged locally, emitted on a per-database change feed, and
//! replicated asynchronously to sibling replicas through a
//! [`ReplicationHub`]. Callers must never assume a locally acknowledged
//! write is already visible to other participants.
//!
//! Incoming revisions are applied through [`Document::merge_from`], so
//! multi-writer documents (the remote result) combine key-wise instead of
//! losing concurrent updates to whole-document replacement.
//!
//! [`fetch_all`] wraps "read all documents" in a bounded retry for fresh
//! replicas that transiently report zero documents while replication
//! catches up.

mod database;
mod fetch;
mod hub;
mod registry;

pub use database::{ChangeEvent, ChangeKind, Database};
pub use fetch::{FETCH_ATTEMPTS, FETCH_MAX_DELAY, FETCH_MIN_DELAY, FetchError, fetch_all};
pub use hub::ReplicationHub;
pub use registry::DbRegistry;

pub use conclave_model::Document;

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// A document failed to serialize for replication.
  #[error("failed to serialize document for replication: {0}")]
  Serialize(#[from] serde_json::Error),
}
