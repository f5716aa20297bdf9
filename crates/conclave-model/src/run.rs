//! Runs and pipeline snapshots.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Document;
use crate::error::RunError;

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
  Pending,
  Running,
  Complete,
  Errored,
}

/// One step of a pipeline: the computation to execute and its declared
/// inputs/outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
  /// Computation id, resolved against the registry at execution time.
  pub computation: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub inputs: Vec<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub outputs: Vec<String>,
}

/// An ordered sequence of steps, snapshotted onto a run at start time.
///
/// The snapshot is immutable once attached; it is what guarantees every
/// participant executes an identical computation graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
  pub steps: Vec<StepSpec>,
}

impl PipelineSpec {
  pub fn single(computation: impl Into<String>) -> Self {
    Self {
      steps: vec![StepSpec {
        computation: computation.into(),
        inputs: Vec::new(),
        outputs: Vec::new(),
      }],
    }
  }
}

/// One execution instance of a pipeline across a fixed participant set.
///
/// The run id is opaque and stable across all participants. Mutation is
/// append-only: status transitions, the end date, and the final results or
/// error. Non-owning participants never rewrite another client's run record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
  pub id: String,
  pub consortium_id: String,
  pub computation_id: String,
  /// Immutable pipeline snapshot.
  pub pipeline: PipelineSpec,
  /// Ordered participant client ids. Position 0 is the initiator.
  pub clients: Vec<String>,
  pub start_date: DateTime<Utc>,
  pub end_date: Option<DateTime<Utc>>,
  pub status: RunStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<RunError>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub results: Option<Value>,
  #[serde(default)]
  pub deleted: bool,
}

impl Run {
  pub fn new(
    id: impl Into<String>,
    consortium_id: impl Into<String>,
    computation_id: impl Into<String>,
    pipeline: PipelineSpec,
    clients: Vec<String>,
  ) -> Self {
    Self {
      id: id.into(),
      consortium_id: consortium_id.into(),
      computation_id: computation_id.into(),
      pipeline,
      clients,
      start_date: Utc::now(),
      end_date: None,
      status: RunStatus::Pending,
      error: None,
      results: None,
      deleted: false,
    }
  }

  /// The client permitted to create the canonical remote-result document.
  ///
  /// Resolution is deterministic: the participant occupying position 0 of
  /// the declared client list, regardless of process start order.
  pub fn initiator(&self) -> Option<&str> {
    self.clients.first().map(String::as_str)
  }

  pub fn is_initiator(&self, client_id: &str) -> bool {
    self.initiator() == Some(client_id)
  }
}

impl Document for Run {
  fn id(&self) -> &str {
    &self.id
  }

  fn deleted(&self) -> bool {
    self.deleted
  }
}

/// Per-client, per-run execution state.
///
/// Owned exclusively by the local runner that produced it; it is shared by
/// value through serialized documents, never by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRunState {
  pub run_id: String,
  /// Index of the step currently (or last) executing.
  pub current_step: usize,
  /// Free-text progress message for status surfaces.
  pub controller_state: String,
  /// Intermediate artifacts keyed by the producing step's computation id.
  pub artifacts: HashMap<String, Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub results: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<RunError>,
}

impl Document for LocalRunState {
  fn id(&self) -> &str {
    &self.run_id
  }
}

impl LocalRunState {
  pub fn new(run_id: impl Into<String>) -> Self {
    Self {
      run_id: run_id.into(),
      current_step: 0,
      controller_state: String::from("pending"),
      artifacts: HashMap::new(),
      results: None,
      error: None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn run_with_clients(clients: &[&str]) -> Run {
    Run::new(
      "run-1",
      "c-1",
      "comp-1",
      PipelineSpec::single("sum"),
      clients.iter().map(|c| c.to_string()).collect(),
    )
  }

  #[test]
  fn initiator_is_first_declared_client() {
    let run = run_with_clients(&["a", "b", "c"]);
    assert_eq!(run.initiator(), Some("a"));
    assert!(run.is_initiator("a"));
    assert!(!run.is_initiator("b"));
    assert!(!run.is_initiator("c"));
  }

  #[test]
  fn empty_client_list_has_no_initiator() {
    let run = run_with_clients(&[]);
    assert_eq!(run.initiator(), None);
  }
}
