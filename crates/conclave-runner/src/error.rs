//! Runner and kickoff errors.

use std::time::Duration;

use conclave_docstore::{FetchError, StoreError};

use crate::wait::WaitError;

/// Errors that can occur while driving a run through the pool.
///
/// Step failures are NOT represented here: they are captured as data on the
/// run record (see [`conclave_model::RunError`]) so other participants
/// observe them through the same channel as success.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
  /// The pool already holds an in-flight or un-torn-down run.
  #[error("runner pool is occupied by run '{run_id}'")]
  Occupied { run_id: String },

  /// The canonical remote-result document was never created.
  #[error("remote result document for run '{run_id}' does not exist")]
  MissingRemoteResult { run_id: String },

  /// The merged result did not arrive within the configured timeout.
  #[error("timed out after {waited:?} waiting for merged result of run '{run_id}'")]
  ResultTimeout { run_id: String, waited: Duration },

  /// The run was cancelled before reaching a terminal state.
  #[error("run '{run_id}' was cancelled")]
  Cancelled { run_id: String },

  /// A document store write failed.
  #[error(transparent)]
  Store(#[from] StoreError),
}

/// Errors that abort the kickoff sequence for one client.
#[derive(Debug, thiserror::Error)]
pub enum KickoffError {
  /// A required database stayed empty past the retry budget.
  #[error("required database '{db_name}' has no documents")]
  MissingDocument {
    db_name: String,
    #[source]
    source: FetchError,
  },

  /// The run declares no participants.
  #[error("run '{run_id}' declares no clients")]
  NoClients { run_id: String },

  /// Waiting for the initiator's remote-result document failed.
  #[error(transparent)]
  Wait(#[from] WaitError),

  /// The runner refused or failed the run.
  #[error(transparent)]
  Runner(#[from] RunnerError),

  /// A document store write failed.
  #[error(transparent)]
  Store(#[from] StoreError),
}
