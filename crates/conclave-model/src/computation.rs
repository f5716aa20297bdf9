//! Consortium and computation documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Document;
use crate::run::PipelineSpec;

/// Executable descriptor for a computation.
///
/// `docker_image` names the container image the step would run inside;
/// resolving and pulling images is outside this core. `input`/`output` are
/// the computation's declared schemas, carried opaquely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputationDescriptor {
  pub docker_image: String,
  pub display: Value,
  pub input: Value,
  pub output: Value,
}

/// A consortium, as stored in the `consortia` database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsortiumDoc {
  #[serde(rename = "_id")]
  pub id: String,
  pub label: String,
  #[serde(default)]
  pub deleted: bool,
}

impl Document for ConsortiumDoc {
  fn id(&self) -> &str {
    &self.id
  }

  fn deleted(&self) -> bool {
    self.deleted
  }
}

/// A computation, as stored in the `computations` database.
///
/// Carries the pipeline a run of this computation executes; the snapshot
/// attached to a run is copied from here at kickoff time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputationDoc {
  #[serde(rename = "_id")]
  pub id: String,
  pub descriptor: ComputationDescriptor,
  pub pipeline: PipelineSpec,
  #[serde(default)]
  pub deleted: bool,
}

impl Document for ComputationDoc {
  fn id(&self) -> &str {
    &self.id
  }

  fn deleted(&self) -> bool {
    self.deleted
  }
}
