//! Whole-system simulations: decl file in, merged result out.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::json;

use conclave_coordinator::{ManagerConfig, PipelineError};
use conclave_model::RunStatus;
use conclave_sim::{SimError, run_simulation, run_simulation_with};

fn write_decl(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
  let path = dir.path().join("decl.json");
  std::fs::write(&path, contents).expect("write decl");
  path
}

#[tokio::test(flavor = "multi_thread")]
async fn two_participants_sum_into_one_merged_total() {
  let dir = tempfile::tempdir().unwrap();
  let decl = write_decl(
    &dir,
    r#"{
      "users": [
        { "username": "alice", "user_data": { "value": 2 } },
        { "username": "bob", "user_data": { "value": 3 } }
      ],
      "computation": "sum"
    }"#,
  );

  let outcome = run_simulation(&decl).await.unwrap();

  assert_eq!(outcome.merged, json!(5));
  assert_eq!(outcome.runs.len(), 2);
  for username in ["alice", "bob"] {
    let record = &outcome.runs[username];
    assert_eq!(record.id, "test_run_id");
    assert_eq!(record.status, RunStatus::Complete);
    assert_eq!(record.results, Some(json!(5)));
    assert!(record.end_date.is_some(), "{username} record has no end date");
  }
}

#[tokio::test(flavor = "multi_thread")]
async fn mean_simulation_averages_across_participants() {
  let dir = tempfile::tempdir().unwrap();
  let decl = write_decl(
    &dir,
    r#"{
      "run_id": "mean-run",
      "users": [
        { "username": "alice", "user_data": { "value": 2 } },
        { "username": "bob", "user_data": { "value": 4 } }
      ],
      "computation": "mean"
    }"#,
  );

  let outcome = run_simulation(&decl).await.unwrap();

  assert_eq!(outcome.merged, json!(3.0));
  assert_eq!(outcome.runs["alice"].id, "mean-run");
}

#[tokio::test(flavor = "multi_thread")]
async fn stalled_participant_trips_the_run_deadline() {
  let dir = tempfile::tempdir().unwrap();
  // Bob's user data carries no "value", so his step fails and his
  // contribution never arrives; the merge can only end via the deadline.
  let decl = write_decl(
    &dir,
    r#"{
      "users": [
        { "username": "alice", "user_data": { "value": 2 } },
        { "username": "bob", "user_data": { "stalled": true } }
      ],
      "computation": "sum"
    }"#,
  );

  let config = ManagerConfig {
    run_deadline: Duration::from_millis(300),
  };
  let err = run_simulation_with(&decl, config).await.unwrap_err();

  match err {
    SimError::Pipeline(PipelineError::DeadlineExceeded { run_id, .. }) => {
      assert_eq!(run_id, "test_run_id");
    }
    other => panic!("expected a deadline failure, got {other:?}"),
  }
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_computation_is_rejected_before_boot() {
  let dir = tempfile::tempdir().unwrap();
  let decl = write_decl(
    &dir,
    r#"{
      "users": [{ "username": "alice" }],
      "computation": "median"
    }"#,
  );

  let err = run_simulation(&decl).await.unwrap_err();
  assert!(matches!(err, SimError::UnknownComputation { name } if name == "median"));
}
