//! Bounded-retry document fetching.
//!
//! Replication is eventually consistent: a freshly synced replica can
//! transiently report zero documents even though its siblings hold data.
//! [`fetch_all`] re-reads `.all()` under a fixed backoff budget before
//! giving up. This is a workaround for replication lag, not a correctness
//! guarantee: it cannot distinguish "legitimately empty" from "not yet
//! replicated", so callers must never use it on a database that is expected
//! to be empty.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use conclave_model::Document;

use crate::database::Database;

/// Delay before the first re-read.
pub const FETCH_MIN_DELAY: Duration = Duration::from_millis(250);

/// Cap on the backoff between re-reads.
pub const FETCH_MAX_DELAY: Duration = Duration::from_millis(3000);

/// Total read attempts before giving up.
pub const FETCH_ATTEMPTS: usize = 5;

/// Error type for [`fetch_all`].
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
  /// The database still reported zero documents after the retry budget.
  #[error("database '{db_name}' contains no documents after {attempts} attempts")]
  ReplicationNotReady { db_name: String, attempts: usize },
}

/// Read all documents of a database, retrying while it reports none.
///
/// Backoff doubles from [`FETCH_MIN_DELAY`] up to [`FETCH_MAX_DELAY`], for
/// at most [`FETCH_ATTEMPTS`] independent reads. Success is any non-empty
/// sequence.
pub async fn fetch_all<D>(db: &Database<D>) -> Result<Vec<D>, FetchError>
where
  D: Document + Serialize + DeserializeOwned,
{
  let mut delay = FETCH_MIN_DELAY;
  for attempt in 1..=FETCH_ATTEMPTS {
    let docs = db.all();
    if !docs.is_empty() {
      debug!(db = %db.name(), attempt, "fetch_all succeeded");
      return Ok(docs);
    }
    if attempt < FETCH_ATTEMPTS {
      tokio::time::sleep(delay).await;
      delay = (delay * 2).min(FETCH_MAX_DELAY);
    }
  }

  Err(FetchError::ReplicationNotReady {
    db_name: db.name().to_string(),
    attempts: FETCH_ATTEMPTS,
  })
}

#[cfg(test)]
mod tests {
  use conclave_model::ConsortiumDoc;
  use tokio::time::Instant;

  use super::*;
  use crate::registry::DbRegistry;

  fn consortium(id: &str) -> ConsortiumDoc {
    ConsortiumDoc {
      id: id.to_string(),
      label: format!("consortium {id}"),
      deleted: false,
    }
  }

  #[tokio::test(start_paused = true)]
  async fn succeeds_when_database_becomes_non_empty_mid_budget() {
    let registry = DbRegistry::local("alice");
    let db = registry.get::<ConsortiumDoc>("consortia");

    // Turns non-empty between the second and third read (backoff so far:
    // 250ms + 500ms).
    let writer = db.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(600)).await;
      writer.put(consortium("c-1")).unwrap();
    });

    let docs = fetch_all(&db).await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].id, "c-1");
  }

  #[tokio::test(start_paused = true)]
  async fn succeeds_immediately_on_non_empty_database() {
    let registry = DbRegistry::local("alice");
    let db = registry.get::<ConsortiumDoc>("consortia");
    db.put(consortium("c-1")).unwrap();

    let start = Instant::now();
    let docs = fetch_all(&db).await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
  }

  #[tokio::test(start_paused = true)]
  async fn permanently_empty_database_exhausts_exactly_five_attempts() {
    let registry = DbRegistry::local("alice");
    let db = registry.get::<ConsortiumDoc>("consortia");

    let start = Instant::now();
    let err = fetch_all(&db).await.unwrap_err();
    let elapsed = start.elapsed();

    match err {
      FetchError::ReplicationNotReady { db_name, attempts } => {
        assert_eq!(db_name, "consortia");
        assert_eq!(attempts, FETCH_ATTEMPTS);
      }
    }

    // Four waits between five attempts: at least 4 x 250ms, and bounded by
    // 5 x 3000ms.
    assert!(elapsed >= FETCH_MIN_DELAY * 4, "elapsed {elapsed:?}");
    assert!(elapsed <= FETCH_MAX_DELAY * 5, "elapsed {elapsed:?}");
  }

  #[tokio::test(start_paused = true)]
  async fn soft_deleted_documents_do_not_count_as_data() {
    let registry = DbRegistry::local("alice");
    let db = registry.get::<ConsortiumDoc>("consortia");
    let mut doc = consortium("c-1");
    doc.deleted = true;
    db.put(doc).unwrap();

    let err = fetch_all(&db).await.unwrap_err();
    assert!(matches!(err, FetchError::ReplicationNotReady { .. }));
  }
}
