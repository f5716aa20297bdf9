//! Merge semantics at the coordination point.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use conclave_docstore::{DbRegistry, ReplicationHub};
use conclave_model::{
  ComputationDescriptor, Contribution, MergeStatus, PipelineSpec, RemoteResult, remote_db_name,
};
use conclave_registry::{ComputationRegistry, StepError, StepExecutor};
use conclave_coordinator::{
  ManagerConfig, PipelineError, RemotePipelineManager, StartPipelineRequest,
};

/// Sums numeric contributions; order-independent by construction.
struct Sum;

#[async_trait]
impl StepExecutor for Sum {
  async fn run(&self, input: Value) -> Result<Value, StepError> {
    Ok(input)
  }

  async fn merge(&self, contributions: &[Contribution]) -> Result<Value, StepError> {
    let mut total = 0;
    for c in contributions {
      total += c.data.as_i64().ok_or_else(|| StepError::InvalidInput {
        message: format!("non-numeric contribution from '{}'", c.client_id),
        input: Some(c.data.clone()),
      })?;
    }
    Ok(json!(total))
  }
}

fn registry() -> Arc<ComputationRegistry> {
  let registry = Arc::new(ComputationRegistry::new());
  registry.register(
    "comp-1",
    ComputationDescriptor {
      docker_image: String::from("conclave/sum:1"),
      display: json!({}),
      input: json!({}),
      output: json!({}),
    },
    Arc::new(Sum),
  );
  registry
}

struct Fixture {
  hub: Arc<ReplicationHub>,
  manager: RemotePipelineManager,
  /// A participant-side replica used to write contributions.
  participant: Arc<DbRegistry>,
}

fn fixture(run_deadline: Duration) -> Fixture {
  let hub = ReplicationHub::new(Duration::from_millis(10));
  let manager_dbs = Arc::new(DbRegistry::replicated("remote", hub.clone()));
  let participant = Arc::new(DbRegistry::replicated("participant", hub.clone()));
  let manager = RemotePipelineManager::new(
    ManagerConfig { run_deadline },
    manager_dbs,
    registry(),
  );
  Fixture {
    hub,
    manager,
    participant,
  }
}

fn request(run_id: &str, clients: &[&str]) -> StartPipelineRequest {
  StartPipelineRequest {
    run_id: run_id.to_string(),
    consortium_id: String::from("c-1"),
    computation_id: String::from("comp-1"),
    clients: clients.iter().map(|c| c.to_string()).collect(),
    spec: PipelineSpec::single("comp-1"),
  }
}

/// Create the pending document and append contributions in the given order.
async fn contribute(fx: &Fixture, run_id: &str, order: &[(&str, i64)]) {
  let db = fx.participant.get::<RemoteResult>(&remote_db_name("c-1"));
  db.put(RemoteResult::new(run_id, "c-1", "comp-1")).unwrap();
  for (client_id, value) in order {
    let mut doc = db.get(run_id).unwrap();
    doc.record_contribution(Contribution::new(*client_id, 1, json!(value)));
    db.put(doc).unwrap();
  }
  fx.hub.quiesce().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn resolves_once_every_declared_client_has_contributed() {
  let fx = fixture(Duration::from_secs(10));
  let handle = fx.manager.start_pipeline(request("run-1", &["alice", "bob"]));

  contribute(&fx, "run-1", &[("alice", 2)]).await;
  // One of two: the handle must still be pending, nothing terminal yet.
  let db = fx.participant.get::<RemoteResult>(&remote_db_name("c-1"));
  assert_eq!(db.get("run-1").unwrap().status, MergeStatus::Pending);

  contribute(&fx, "run-1", &[("bob", 3)]).await;
  assert_eq!(handle.result().await.unwrap(), json!(5));

  // The terminal document replicated back to the participant side.
  fx.hub.quiesce().await;
  let doc = db.get("run-1").unwrap();
  assert_eq!(doc.status, MergeStatus::Complete);
  assert_eq!(doc.merged, Some(json!(5)));
}

#[tokio::test(flavor = "multi_thread")]
async fn contribution_arrival_order_does_not_change_the_merge() {
  let fx = fixture(Duration::from_secs(10));

  let forward = fx.manager.start_pipeline(request("run-fwd", &["a", "b", "c"]));
  contribute(&fx, "run-fwd", &[("a", 1), ("b", 2), ("c", 3)]).await;

  let reverse = fx.manager.start_pipeline(request("run-rev", &["a", "b", "c"]));
  contribute(&fx, "run-rev", &[("c", 3), ("b", 2), ("a", 1)]).await;

  assert_eq!(forward.result().await.unwrap(), json!(6));
  assert_eq!(reverse.result().await.unwrap(), json!(6));
}

#[tokio::test(flavor = "multi_thread")]
async fn late_contributions_never_reopen_a_terminal_result() {
  let fx = fixture(Duration::from_secs(10));
  let handle = fx.manager.start_pipeline(request("run-1", &["alice", "bob"]));
  contribute(&fx, "run-1", &[("alice", 2), ("bob", 3)]).await;
  assert_eq!(handle.result().await.unwrap(), json!(5));
  fx.hub.quiesce().await;

  // A duplicate arrives after terminal; the document must not change.
  let db = fx.participant.get::<RemoteResult>(&remote_db_name("c-1"));
  let mut doc = db.get("run-1").unwrap();
  doc.record_contribution(Contribution::new("alice", 9, json!(100)));
  db.put(doc).unwrap();
  fx.hub.quiesce().await;

  let doc = db.get("run-1").unwrap();
  assert_eq!(doc.merged, Some(json!(5)));
  assert_eq!(doc.contribution("alice").unwrap().data, json!(2));
}

#[tokio::test(flavor = "multi_thread")]
async fn stalled_participant_forces_deadline_failure_through_storage() {
  let fx = fixture(Duration::from_millis(300));
  let handle = fx.manager.start_pipeline(request("run-1", &["alice", "bob"]));

  // bob never reports.
  contribute(&fx, "run-1", &[("alice", 2)]).await;

  let err = handle.result().await.unwrap_err();
  assert!(matches!(err, PipelineError::DeadlineExceeded { run_id, .. } if run_id == "run-1"));

  // The failure is observable by every participant through replication.
  fx.hub.quiesce().await;
  let doc = fx
    .participant
    .get::<RemoteResult>(&remote_db_name("c-1"))
    .get("run-1")
    .unwrap();
  assert_eq!(doc.status, MergeStatus::Errored);
  assert_eq!(doc.error.unwrap().message, "run deadline exceeded");
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelling_the_handle_fails_the_run() {
  let fx = fixture(Duration::from_secs(10));
  let handle = fx.manager.start_pipeline(request("run-1", &["alice", "bob"]));
  contribute(&fx, "run-1", &[("alice", 2)]).await;

  handle.cancel_token().cancel();
  let err = handle.result().await.unwrap_err();
  assert!(matches!(err, PipelineError::Cancelled { run_id } if run_id == "run-1"));

  fx.hub.quiesce().await;
  let doc = fx
    .participant
    .get::<RemoteResult>(&remote_db_name("c-1"))
    .get("run-1")
    .unwrap();
  assert_eq!(doc.status, MergeStatus::Errored);
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_computation_rejects_immediately() {
  let fx = fixture(Duration::from_secs(10));
  let mut req = request("run-1", &["alice"]);
  req.computation_id = String::from("nope");

  let err = fx.manager.start_pipeline(req).result().await.unwrap_err();
  assert!(matches!(err, PipelineError::UnknownComputation { run_id, .. } if run_id == "run-1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn merge_failure_is_the_run_terminal_error() {
  let fx = fixture(Duration::from_secs(10));
  let handle = fx.manager.start_pipeline(request("run-1", &["alice"]));

  // Non-numeric contribution makes the sum merge fail.
  contribute(&fx, "run-1", &[]).await;
  let db = fx.participant.get::<RemoteResult>(&remote_db_name("c-1"));
  let mut doc = db.get("run-1").unwrap();
  doc.record_contribution(Contribution::new("alice", 1, json!("not a number")));
  db.put(doc).unwrap();
  fx.hub.quiesce().await;

  let err = handle.result().await.unwrap_err();
  match err {
    PipelineError::RunFailed { run_id, error } => {
      assert_eq!(run_id, "run-1");
      assert!(error.message.contains("non-numeric contribution"));
    }
    other => panic!("expected RunFailed, got {other:?}"),
  }

  fx.hub.quiesce().await;
  assert_eq!(db.get("run-1").unwrap().status, MergeStatus::Errored);
}
