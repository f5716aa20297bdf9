//! Waiting for the remote-result document.
//!
//! The primary path is the database's change feed; a fixed-interval poll of
//! the replica runs alongside it as a safety net, and the whole wait is
//! bounded by a timeout and a cancellation token. (The original design
//! polled every 50 ms forever with no other mechanism; the poll interval is
//! kept, the unboundedness is not.)

use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use conclave_docstore::Database;
use conclave_model::RemoteResult;

/// Errors from [`wait_for_remote_result`].
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
  /// The document never matched within the timeout.
  #[error("timed out after {waited:?} waiting for remote result of run '{run_id}'")]
  Timeout { run_id: String, waited: Duration },

  /// The wait was cancelled externally.
  #[error("wait for remote result of run '{run_id}' was cancelled")]
  Cancelled { run_id: String },
}

/// Tuning for the orchestration wait.
#[derive(Debug, Clone, Copy)]
pub struct WaitConfig {
  /// Upper bound on the whole wait.
  pub timeout: Duration,
  /// Safety-net poll interval.
  pub poll_interval: Duration,
}

impl Default for WaitConfig {
  fn default() -> Self {
    Self {
      timeout: Duration::from_secs(30),
      poll_interval: Duration::from_millis(50),
    }
  }
}

/// Wait until the run's remote-result document exists and satisfies
/// `matches`.
///
/// Subscribes to the change feed before the initial read so no update can
/// slip between them.
pub async fn wait_for_remote_result<F>(
  db: &Database<RemoteResult>,
  run_id: &str,
  matches: F,
  config: WaitConfig,
  cancel: &CancellationToken,
) -> Result<RemoteResult, WaitError>
where
  F: Fn(&RemoteResult) -> bool,
{
  let mut changes = db.changes();
  if let Some(doc) = db.get(run_id) {
    if matches(&doc) {
      return Ok(doc);
    }
  }

  let started = Instant::now();
  let deadline = tokio::time::sleep(config.timeout);
  tokio::pin!(deadline);
  let mut poll = tokio::time::interval(config.poll_interval);
  poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
  let mut feed_open = true;

  loop {
    tokio::select! {
      _ = cancel.cancelled() => {
        return Err(WaitError::Cancelled { run_id: run_id.to_string() });
      }
      _ = &mut deadline => {
        return Err(WaitError::Timeout {
          run_id: run_id.to_string(),
          waited: started.elapsed(),
        });
      }
      event = changes.recv(), if feed_open => match event {
        Ok(event) => {
          if event.doc.id == run_id && !event.doc.deleted && matches(&event.doc) {
            return Ok(event.doc);
          }
        }
        Err(RecvError::Lagged(skipped)) => {
          // Missed events; the poll branch will re-read the replica.
          debug!(run_id, skipped, "change feed lagged during remote-result wait");
        }
        Err(RecvError::Closed) => {
          feed_open = false;
        }
      },
      _ = poll.tick() => {
        if let Some(doc) = db.get(run_id) {
          if matches(&doc) {
            return Ok(doc);
          }
        }
      }
    }
  }
}
