//! Coordinator errors.

use std::time::Duration;

use conclave_model::RunError;
use conclave_registry::RegistryError;

/// Terminal failure of a coordinated run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
  /// The run reached an errored terminal state.
  #[error("run '{run_id}' failed: {error}")]
  RunFailed { run_id: String, error: RunError },

  /// Not every participant reported before the run deadline.
  #[error("run '{run_id}' exceeded its deadline after {waited:?}")]
  DeadlineExceeded { run_id: String, waited: Duration },

  /// The run was cancelled through its handle.
  #[error("run '{run_id}' was cancelled")]
  Cancelled { run_id: String },

  /// The requested computation is not registered on the coordinator.
  #[error("computation for run '{run_id}' is not registered")]
  UnknownComputation {
    run_id: String,
    #[source]
    source: RegistryError,
  },

  /// The driver task went away without resolving the run.
  #[error("run '{run_id}' aborted without resolving")]
  Aborted { run_id: String },
}

/// Server-to-server result delivery failure.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
  #[error("http transport error: {0}")]
  Http(#[from] reqwest::Error),

  /// The authenticate call answered without a token.
  #[error("authentication response carried no token")]
  MissingToken,
}
