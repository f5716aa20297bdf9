//! Simulation errors.

use std::path::PathBuf;

use conclave_coordinator::PipelineError;
use conclave_docstore::StoreError;

/// Errors raised by the simulation harness and participant tasks.
///
/// Protocol violations are fatal: a participant that receives a malformed
/// or out-of-order message exits instead of limping on.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
  #[error("failed to read decl file '{path}'")]
  DeclRead {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse decl file '{path}'")]
  DeclParse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("decl names unknown computation '{name}'")]
  UnknownComputation { name: String },

  #[error("boot protocol violation: {0}")]
  Protocol(String),

  #[error("message channel to client '{username}' closed")]
  ChannelClosed { username: String },

  #[error(transparent)]
  Pipeline(#[from] PipelineError),

  #[error(transparent)]
  Store(#[from] StoreError),
}
