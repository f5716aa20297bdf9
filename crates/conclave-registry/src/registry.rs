//! Registry of installed computations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use conclave_model::ComputationDescriptor;

use crate::RegistryError;
use crate::executor::StepExecutor;

/// A registered computation: its descriptor plus the executor that runs it.
#[derive(Clone)]
pub struct RegistryEntry {
  pub descriptor: ComputationDescriptor,
  pub executor: Arc<dyn StepExecutor>,
}

impl std::fmt::Debug for RegistryEntry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RegistryEntry")
      .field("descriptor", &self.descriptor)
      .finish_non_exhaustive()
  }
}

/// Registry of computations available to this process.
///
/// Populated once at boot (in simulation, stubbed directly rather than
/// pulled from a distribution channel) and read-only during a run.
#[derive(Default)]
pub struct ComputationRegistry {
  entries: RwLock<HashMap<String, RegistryEntry>>,
}

impl ComputationRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a computation under its id. Re-registering an id replaces the
  /// previous entry; boot-time stubbing relies on this.
  pub fn register(
    &self,
    computation_id: impl Into<String>,
    descriptor: ComputationDescriptor,
    executor: Arc<dyn StepExecutor>,
  ) {
    self
      .entries
      .write()
      .expect("computation registry lock poisoned")
      .insert(computation_id.into(), RegistryEntry { descriptor, executor });
  }

  /// Resolve a computation id to its entry.
  pub fn get(&self, computation_id: &str) -> Result<RegistryEntry, RegistryError> {
    self
      .entries
      .read()
      .expect("computation registry lock poisoned")
      .get(computation_id)
      .cloned()
      .ok_or_else(|| RegistryError::NotFound {
        computation_id: computation_id.to_string(),
      })
  }

  pub fn contains(&self, computation_id: &str) -> bool {
    self
      .entries
      .read()
      .expect("computation registry lock poisoned")
      .contains_key(computation_id)
  }
}
