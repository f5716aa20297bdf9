//! Conclave computation registry.
//!
//! Maps a computation id to its executable descriptor and a [`StepExecutor`]
//! implementation. The registry is populated once at client boot and is
//! read-only for the duration of a run; every participant resolving the same
//! computation id therefore executes the same code.

mod executor;
mod registry;

pub use executor::{StepError, StepExecutor};
pub use registry::{ComputationRegistry, RegistryEntry};

/// Errors that can occur during registry lookups.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
  /// Computation id is not registered.
  #[error("computation not found: {computation_id}")]
  NotFound { computation_id: String },
}
