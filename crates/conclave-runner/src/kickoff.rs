//! The kickoff sequence.
//!
//! A run is declared identically on every participant; each client runs
//! this sequence independently. The consortium and computation to use are
//! always the first document of their respective databases. The initiator,
//! and only the initiator, creates the pending remote-result document;
//! every other participant waits for it to replicate in before proceeding
//! to local execution.

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use conclave_docstore::fetch_all;
use conclave_model::{
  COMPUTATIONS_DB, CONSORTIA_DB, ComputationDoc, ConsortiumDoc, RemoteResult, Run, remote_db_name,
};

use crate::error::KickoffError;
use crate::pool::LocalRunnerPool;
use crate::wait::{WaitConfig, wait_for_remote_result};

/// Declaration of one run, as seen by a single participant.
#[derive(Debug, Clone)]
pub struct KickoffConfig {
  /// Opaque run id, identical on every participant.
  pub run_id: String,
  /// Ordered participant list; position 0 is the initiator.
  pub clients: Vec<String>,
  /// This participant's input to the first pipeline step.
  pub user_data: Value,
  /// Bound on the non-initiator wait for the remote-result document.
  pub wait: WaitConfig,
}

impl KickoffConfig {
  pub fn new(run_id: impl Into<String>, clients: Vec<String>, user_data: Value) -> Self {
    Self {
      run_id: run_id.into(),
      clients,
      user_data,
      wait: WaitConfig::default(),
    }
  }
}

/// Start (or join) a run and drive it to this client's terminal state.
pub async fn kickoff(
  pool: &LocalRunnerPool,
  config: KickoffConfig,
  cancel: &CancellationToken,
) -> Result<Run, KickoffError> {
  if config.clients.is_empty() {
    return Err(KickoffError::NoClients { run_id: config.run_id });
  }

  let dbs = pool.dbs();
  let consortia = fetch_all(&dbs.get::<ConsortiumDoc>(CONSORTIA_DB))
    .await
    .map_err(|source| KickoffError::MissingDocument {
      db_name: CONSORTIA_DB.to_string(),
      source,
    })?;
  let computations = fetch_all(&dbs.get::<ComputationDoc>(COMPUTATIONS_DB))
    .await
    .map_err(|source| KickoffError::MissingDocument {
      db_name: COMPUTATIONS_DB.to_string(),
      source,
    })?;

  let consortium = &consortia[0];
  let computation = &computations[0];
  let remote = dbs.get::<RemoteResult>(&remote_db_name(&consortium.id));

  let is_initiator = config.clients[0] == pool.client_id();
  if is_initiator {
    info!(
      client_id = %pool.client_id(),
      run_id = %config.run_id,
      "initiator creating remote result"
    );
    remote.put(RemoteResult::new(
      &config.run_id,
      &consortium.id,
      &computation.id,
    ))?;
  } else {
    info!(
      client_id = %pool.client_id(),
      run_id = %config.run_id,
      "waiting for initiator's remote result"
    );
    wait_for_remote_result(&remote, &config.run_id, |_| true, config.wait, cancel).await?;
  }

  let run = Run::new(
    &config.run_id,
    &consortium.id,
    &computation.id,
    computation.pipeline.clone(),
    config.clients.clone(),
  );

  let record = pool.trigger_runner(&run, config.user_data, cancel).await?;
  Ok(record)
}
