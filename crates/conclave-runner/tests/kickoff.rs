//! Kickoff orchestration: initiator determinism and missing-document
//! handling.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use conclave_docstore::{DbRegistry, ReplicationHub};
use conclave_model::{
  ComputationDescriptor, ComputationDoc, ConsortiumDoc, Contribution, PipelineSpec, RemoteResult,
  RunStatus, remote_db_name,
};
use conclave_registry::{ComputationRegistry, StepError, StepExecutor};
use conclave_runner::{
  KickoffConfig, KickoffError, LocalRunnerPool, PoolConfig, WaitConfig, WaitError, kickoff,
};

/// Passes `value` through locally; merge sums all contributions.
struct PassValue;

#[async_trait]
impl StepExecutor for PassValue {
  async fn run(&self, input: Value) -> Result<Value, StepError> {
    input
      .get("value")
      .cloned()
      .ok_or_else(|| StepError::InvalidInput {
        message: String::from("missing 'value'"),
        input: Some(input.clone()),
      })
  }

  async fn merge(&self, contributions: &[Contribution]) -> Result<Value, StepError> {
    let mut total = 0;
    for c in contributions {
      total += c.data.as_i64().unwrap_or(0);
    }
    Ok(json!(total))
  }
}

fn registry() -> Arc<ComputationRegistry> {
  let registry = Arc::new(ComputationRegistry::new());
  registry.register(
    "pass-value",
    ComputationDescriptor {
      docker_image: String::from("conclave/pass-value:1"),
      display: json!({}),
      input: json!({}),
      output: json!({}),
    },
    Arc::new(PassValue),
  );
  registry
}

fn seed(dbs: &DbRegistry) {
  dbs
    .get::<ConsortiumDoc>("consortia")
    .put(ConsortiumDoc {
      id: String::from("c-1"),
      label: String::from("test consortium"),
      deleted: false,
    })
    .unwrap();
  dbs
    .get::<ComputationDoc>("computations")
    .put(ComputationDoc {
      id: String::from("comp-1"),
      descriptor: ComputationDescriptor {
        docker_image: String::from("conclave/pass-value:1"),
        display: json!({}),
        input: json!({}),
        output: json!({}),
      },
      pipeline: PipelineSpec::single("pass-value"),
      deleted: false,
    })
    .unwrap();
}

fn client_pool(hub: &Arc<ReplicationHub>, client_id: &str) -> Arc<LocalRunnerPool> {
  let dbs = Arc::new(DbRegistry::replicated(client_id, Arc::clone(hub)));
  Arc::new(LocalRunnerPool::new(
    PoolConfig::new(client_id),
    registry(),
    dbs,
  ))
}

/// Merge the run once the full contribution set has arrived, standing in
/// for the remote manager.
fn spawn_mini_merger(dbs: &DbRegistry, run_id: &str, clients: Vec<String>) {
  let db = dbs.get::<RemoteResult>(&remote_db_name("c-1"));
  let run_id = run_id.to_string();
  let mut changes = db.changes();
  tokio::spawn(async move {
    loop {
      let Ok(event) = changes.recv().await else {
        return;
      };
      if event.doc.id != run_id || event.doc.is_terminal() {
        continue;
      }
      if event.doc.has_all(&clients) {
        let mut doc = event.doc;
        let total: i64 = doc
          .contributions
          .iter()
          .map(|c| c.data.as_i64().unwrap_or(0))
          .sum();
        doc.complete(json!(total));
        db.put(doc).unwrap();
        return;
      }
    }
  });
}

fn kickoff_config(clients: &[&str], value: i64, wait_timeout: Duration) -> KickoffConfig {
  let mut config = KickoffConfig::new(
    "test_run_id",
    clients.iter().map(|c| c.to_string()).collect(),
    json!({ "value": value }),
  );
  config.wait = WaitConfig {
    timeout: wait_timeout,
    poll_interval: Duration::from_millis(50),
  };
  config
}

#[tokio::test(flavor = "multi_thread")]
async fn non_initiators_never_create_the_remote_result() {
  let hub = ReplicationHub::new(Duration::from_millis(10));
  let seeder = DbRegistry::replicated("seeder", hub.clone());
  seed(&seeder);

  // b and c kick off WITHOUT the initiator a. Both must wait, time out, and
  // leave the remote-result database empty.
  let bob = client_pool(&hub, "b");
  let carol = client_pool(&hub, "c");

  let clients = ["a", "b", "c"];
  let bob_token = CancellationToken::new();
  let carol_token = CancellationToken::new();
  let (bob_result, carol_result) = tokio::join!(
    kickoff(
      &bob,
      kickoff_config(&clients, 2, Duration::from_millis(400)),
      &bob_token,
    ),
    kickoff(
      &carol,
      kickoff_config(&clients, 3, Duration::from_millis(400)),
      &carol_token,
    ),
  );

  for result in [bob_result, carol_result] {
    let err = result.unwrap_err();
    assert!(matches!(
      err,
      KickoffError::Wait(WaitError::Timeout { run_id, .. }) if run_id == "test_run_id"
    ));
  }

  hub.quiesce().await;
  let remote = seeder.get::<RemoteResult>(&remote_db_name("c-1"));
  assert!(remote.get("test_run_id").is_none(), "a non-initiator created the document");
}

#[tokio::test(flavor = "multi_thread")]
async fn initiator_creates_and_all_participants_complete_regardless_of_start_order() {
  let hub = ReplicationHub::new(Duration::from_millis(10));
  let seeder = DbRegistry::replicated("seeder", hub.clone());
  seed(&seeder);

  let clients = ["a", "b", "c"];
  spawn_mini_merger(&seeder, "test_run_id", clients.iter().map(|c| c.to_string()).collect());

  let alice = client_pool(&hub, "a");
  let bob = client_pool(&hub, "b");
  let carol = client_pool(&hub, "c");

  // Reverse start order: the non-initiators begin waiting before the
  // initiator even boots.
  let carol_task = {
    let carol = Arc::clone(&carol);
    tokio::spawn(async move {
      kickoff(
        &carol,
        kickoff_config(&clients, 3, Duration::from_secs(5)),
        &CancellationToken::new(),
      )
      .await
    })
  };
  let bob_task = {
    let bob = Arc::clone(&bob);
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(30)).await;
      kickoff(
        &bob,
        kickoff_config(&clients, 2, Duration::from_secs(5)),
        &CancellationToken::new(),
      )
      .await
    })
  };
  let alice_task = {
    let alice = Arc::clone(&alice);
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(60)).await;
      kickoff(
        &alice,
        kickoff_config(&clients, 1, Duration::from_secs(5)),
        &CancellationToken::new(),
      )
      .await
    })
  };

  for task in [alice_task, bob_task, carol_task] {
    let record = task.await.unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Complete);
    assert_eq!(record.results, Some(json!(6)));
    assert!(record.end_date.is_some());
  }
}

#[tokio::test(start_paused = true)]
async fn empty_required_databases_abort_the_kickoff() {
  // Unreplicated registry with nothing seeded: the consortia fetch exhausts
  // its retry budget and kickoff fails loudly for this client.
  let dbs = Arc::new(DbRegistry::local("a"));
  let pool = LocalRunnerPool::new(PoolConfig::new("a"), registry(), dbs);

  let err = kickoff(
    &pool,
    KickoffConfig::new("test_run_id", vec![String::from("a")], json!({ "value": 1 })),
    &CancellationToken::new(),
  )
  .await
  .unwrap_err();

  assert!(matches!(
    err,
    KickoffError::MissingDocument { db_name, .. } if db_name == "consortia"
  ));
}
