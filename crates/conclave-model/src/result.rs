//! The shared remote result and its per-client contributions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Document;
use crate::error::RunError;

/// Merge state of a remote result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
  Pending,
  Complete,
  Errored,
}

/// One participant's partial result for a run.
///
/// `seq` disambiguates resubmissions (client retry, replication replay):
/// for a given client id the highest seq wins, and an equal seq is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
  pub client_id: String,
  pub seq: u64,
  pub data: Value,
}

impl Contribution {
  pub fn new(client_id: impl Into<String>, seq: u64, data: Value) -> Self {
    Self {
      client_id: client_id.into(),
      seq,
      data,
    }
  }
}

/// The single canonical, eventually-terminal result document for a run.
///
/// Shares its identity with the run itself: the document id IS the run id.
/// Only the initiator creates it; every participant appends its own
/// contribution under its own client-id key, so concurrent non-atomic writes
/// from different replicas never lose updates. Once terminal it is
/// shared-immutable and is never re-opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteResult {
  #[serde(rename = "_id")]
  pub id: String,
  pub consortium_id: String,
  pub computation_id: String,
  /// Per-client contributions, in arrival order.
  pub contributions: Vec<Contribution>,
  pub status: MergeStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub merged: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<RunError>,
  #[serde(default)]
  pub deleted: bool,
}

impl RemoteResult {
  pub fn new(
    run_id: impl Into<String>,
    consortium_id: impl Into<String>,
    computation_id: impl Into<String>,
  ) -> Self {
    Self {
      id: run_id.into(),
      consortium_id: consortium_id.into(),
      computation_id: computation_id.into(),
      contributions: Vec::new(),
      status: MergeStatus::Pending,
      merged: None,
      error: None,
      deleted: false,
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self.status, MergeStatus::Complete | MergeStatus::Errored)
  }

  pub fn contribution(&self, client_id: &str) -> Option<&Contribution> {
    self.contributions.iter().find(|c| c.client_id == client_id)
  }

  /// True when every declared client id has a recorded contribution.
  pub fn has_all(&self, clients: &[String]) -> bool {
    clients.iter().all(|c| self.contribution(c).is_some())
  }

  /// Record a contribution, keyed by client id.
  ///
  /// Last-write-wins by highest seq; an equal or lower seq for an already
  /// recorded client is dropped. Contributions arriving after the result is
  /// terminal are ignored. Returns whether the document changed.
  pub fn record_contribution(&mut self, contribution: Contribution) -> bool {
    if self.is_terminal() {
      return false;
    }
    match self
      .contributions
      .iter_mut()
      .find(|c| c.client_id == contribution.client_id)
    {
      Some(existing) if contribution.seq > existing.seq => {
        *existing = contribution;
        true
      }
      Some(_) => false,
      None => {
        self.contributions.push(contribution);
        true
      }
    }
  }

  /// Transition to `Complete` with the merged payload. No-op once terminal.
  pub fn complete(&mut self, merged: Value) {
    if self.is_terminal() {
      return;
    }
    self.merged = Some(merged);
    self.status = MergeStatus::Complete;
  }

  /// Transition to `Errored` with the terminal error. No-op once terminal.
  pub fn fail(&mut self, error: RunError) {
    if self.is_terminal() {
      return;
    }
    self.error = Some(error);
    self.status = MergeStatus::Errored;
  }
}

impl Document for RemoteResult {
  fn id(&self) -> &str {
    &self.id
  }

  fn deleted(&self) -> bool {
    self.deleted
  }

  /// Union of the two revisions.
  ///
  /// Contributions merge key-wise under their client ids rather than by
  /// replacing the document wholesale, so an appended contribution on one
  /// replica can never erase a concurrent append from another. A terminal
  /// incoming revision carries its terminal status and payload over a
  /// still-pending local one; a terminal local revision never re-opens.
  fn merge_from(&mut self, incoming: Self) {
    if self.is_terminal() {
      return;
    }
    for contribution in incoming.contributions {
      self.record_contribution(contribution);
    }
    match incoming.status {
      MergeStatus::Complete => {
        self.merged = incoming.merged;
        self.status = MergeStatus::Complete;
      }
      MergeStatus::Errored => {
        self.error = incoming.error;
        self.status = MergeStatus::Errored;
      }
      MergeStatus::Pending => {}
    }
    // Deletion only ever propagates in; a stale live revision replicating
    // late must not resurrect a tombstone.
    if incoming.deleted {
      self.deleted = true;
    }
  }
}
