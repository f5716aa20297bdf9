//! Driving a whole simulation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::info;

use conclave_coordinator::{ManagerConfig, RemotePipelineManager, StartPipelineRequest};
use conclave_docstore::{DbRegistry, ReplicationHub};
use conclave_model::{
  COMPUTATIONS_DB, CONSORTIA_DB, ComputationDoc, ConsortiumDoc, PipelineSpec, Run,
};
use conclave_registry::ComputationRegistry;

use crate::client::{ClientHandle, ClientMessage, ParentMessage, spawn_client};
use crate::computations::{builtin, register_builtins};
use crate::decl::SimDecl;
use crate::error::SimError;

/// Consortium id used by every simulation.
pub const SIM_CONSORTIUM_ID: &str = "sim-consortium";

const SIM_REPLICATION_LAG: Duration = Duration::from_millis(10);

/// Result of a completed simulation.
#[derive(Debug)]
pub struct SimulationOutcome {
  /// The run's merged terminal payload.
  pub merged: Value,
  /// Each participant's final local run record, by username.
  pub runs: HashMap<String, Run>,
}

/// Run a simulation with the default manager configuration.
pub async fn run_simulation(decl_path: &Path) -> Result<SimulationOutcome, SimError> {
  run_simulation_with(decl_path, ManagerConfig::default()).await
}

/// Run a simulation: seed the shared databases, start the remote manager,
/// boot every declared participant, kick them all off, and collect the
/// merged result plus the per-participant run records.
pub async fn run_simulation_with(
  decl_path: &Path,
  manager_config: ManagerConfig,
) -> Result<SimulationOutcome, SimError> {
  let decl = SimDecl::load(decl_path).await?;
  let hub = ReplicationHub::new(SIM_REPLICATION_LAG);

  let pipeline = seed_databases(&DbRegistry::replicated("simulator", hub.clone()), &decl)?;

  // The remote side: its own replica set plus the merge registry.
  let manager_dbs = Arc::new(DbRegistry::replicated("remote", hub.clone()));
  let registry = Arc::new(ComputationRegistry::new());
  register_builtins(&registry);
  let manager = RemotePipelineManager::new(manager_config, manager_dbs, registry);
  let handle = manager.start_pipeline(StartPipelineRequest {
    run_id: decl.run_id.clone(),
    consortium_id: SIM_CONSORTIUM_ID.to_string(),
    computation_id: decl.computation.clone(),
    clients: decl.usernames(),
    spec: pipeline,
  });

  // Boot every participant and wait for its ready handshake before moving
  // on, in declared order.
  let mut clients: Vec<ClientHandle> = Vec::with_capacity(decl.users.len());
  for user in &decl.users {
    let mut client = spawn_client(&user.username, hub.clone());
    client.send(ParentMessage::Boot {
      decl_path: decl_path.to_path_buf(),
      username: user.username.clone(),
    })?;
    match client.recv().await {
      Some(ClientMessage::Ready { .. }) => {}
      other => {
        return Err(SimError::Protocol(format!(
          "client '{}' sent non-ready message first: {other:?}",
          user.username
        )));
      }
    }
    clients.push(client);
  }
  info!(clients = clients.len(), run_id = %decl.run_id, "all clients ready, kicking off");

  for client in &clients {
    client.send(ParentMessage::Kickoff)?;
  }

  let merged = handle.result().await;

  // Collect run records only when the run resolved; participants observe
  // the same terminal state through replication.
  let mut runs = HashMap::new();
  if merged.is_ok() {
    for client in &mut clients {
      let record = client.wait_run_record().await?;
      runs.insert(client.username.clone(), record);
    }
  }

  for client in &clients {
    client.send(ParentMessage::Teardown)?;
  }
  for mut client in clients {
    match client.recv().await {
      Some(ClientMessage::Toredown) | None => {}
      Some(other) => {
        return Err(SimError::Protocol(format!(
          "client '{}' answered teardown with {other:?}",
          client.username
        )));
      }
    }
    client.join().await?;
  }

  Ok(SimulationOutcome {
    merged: merged?,
    runs,
  })
}

/// Seed the consortium and computation documents every participant will
/// fetch at kickoff, and return the pipeline snapshot for the manager.
fn seed_databases(seeder: &DbRegistry, decl: &SimDecl) -> Result<PipelineSpec, SimError> {
  let Some((descriptor, _)) = builtin(&decl.computation) else {
    return Err(SimError::UnknownComputation {
      name: decl.computation.clone(),
    });
  };

  seeder.get::<ConsortiumDoc>(CONSORTIA_DB).put(ConsortiumDoc {
    id: SIM_CONSORTIUM_ID.to_string(),
    label: String::from("simulated consortium"),
    deleted: false,
  })?;

  let pipeline = PipelineSpec::single(&decl.computation);
  seeder
    .get::<ComputationDoc>(COMPUTATIONS_DB)
    .put(ComputationDoc {
      id: decl.computation.clone(),
      descriptor,
      pipeline: pipeline.clone(),
      deleted: false,
    })?;

  Ok(pipeline)
}
