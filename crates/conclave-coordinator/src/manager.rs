//! The remote pipeline manager.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use conclave_docstore::{Database, DbRegistry};
use conclave_model::{PipelineSpec, RemoteResult, RunError, remote_db_name};
use conclave_registry::{ComputationRegistry, RegistryEntry};

use crate::error::PipelineError;

/// Tuning for the manager.
#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
  /// Run-level deadline: if the full contribution set has not arrived by
  /// then, the run is forced to an errored terminal state through shared
  /// storage.
  pub run_deadline: Duration,
}

impl Default for ManagerConfig {
  fn default() -> Self {
    Self {
      run_deadline: Duration::from_secs(300),
    }
  }
}

/// A run-start request as received at the coordination point.
#[derive(Debug, Clone)]
pub struct StartPipelineRequest {
  pub run_id: String,
  pub consortium_id: String,
  pub computation_id: String,
  /// Declared participant set; the merge completes only when every one of
  /// these ids has contributed. No quorum or partial-success mode exists.
  pub clients: Vec<String>,
  /// Immutable pipeline snapshot, identical on every participant.
  pub spec: PipelineSpec,
}

/// Handle to one coordinated run.
///
/// `result` resolves exactly once: with the merged payload, or with the
/// terminal error. Streaming status is not part of this future.
pub struct PipelineHandle {
  run_id: String,
  cancel: CancellationToken,
  result: oneshot::Receiver<Result<Value, PipelineError>>,
}

impl PipelineHandle {
  pub fn run_id(&self) -> &str {
    &self.run_id
  }

  /// Token cancelling the run; the failure propagates to participants
  /// through shared storage like any other terminal error.
  pub fn cancel_token(&self) -> CancellationToken {
    self.cancel.clone()
  }

  /// Wait for the run's single terminal outcome.
  pub async fn result(self) -> Result<Value, PipelineError> {
    match self.result.await {
      Ok(outcome) => outcome,
      Err(_) => Err(PipelineError::Aborted {
        run_id: self.run_id,
      }),
    }
  }
}

/// Coordination point for runs: fans nothing in-process (participants pull
/// the run declaration themselves) but observes their contributions arrive
/// via the replicated remote-result database and resolves each run exactly
/// once.
pub struct RemotePipelineManager {
  config: ManagerConfig,
  dbs: Arc<DbRegistry>,
  registry: Arc<ComputationRegistry>,
}

impl RemotePipelineManager {
  pub fn new(config: ManagerConfig, dbs: Arc<DbRegistry>, registry: Arc<ComputationRegistry>) -> Self {
    Self {
      config,
      dbs,
      registry,
    }
  }

  /// Begin coordinating a run. Returns immediately; the returned handle's
  /// `result` future resolves when the run reaches its terminal state.
  pub fn start_pipeline(&self, request: StartPipelineRequest) -> PipelineHandle {
    let (tx, rx) = oneshot::channel();
    let cancel = CancellationToken::new();

    info!(
      run_id = %request.run_id,
      clients = request.clients.len(),
      computation_id = %request.computation_id,
      "pipeline is starting"
    );

    let db = self
      .dbs
      .get::<RemoteResult>(&remote_db_name(&request.consortium_id));
    let registry = Arc::clone(&self.registry);
    let deadline = self.config.run_deadline;
    let run_id = request.run_id.clone();
    tokio::spawn(drive(db, registry, request, deadline, cancel.clone(), tx));

    PipelineHandle {
      run_id,
      cancel,
      result: rx,
    }
  }
}

/// Watch the run until terminal and resolve the handle exactly once.
async fn drive(
  db: Database<RemoteResult>,
  registry: Arc<ComputationRegistry>,
  request: StartPipelineRequest,
  deadline: Duration,
  cancel: CancellationToken,
  tx: oneshot::Sender<Result<Value, PipelineError>>,
) {
  let run_id = request.run_id.clone();
  let started = Instant::now();

  let entry = match registry.get(&request.computation_id) {
    Ok(entry) => entry,
    Err(source) => {
      let _ = tx.send(Err(PipelineError::UnknownComputation { run_id, source }));
      return;
    }
  };

  // Subscribe before the initial read so no contribution slips between.
  let mut changes = db.changes();
  let sleep = tokio::time::sleep(deadline);
  tokio::pin!(sleep);

  let outcome = loop {
    if let Some(outcome) = try_resolve(&db, &entry, &request).await {
      break outcome;
    }

    tokio::select! {
      _ = cancel.cancelled() => {
        fail_through_storage(&db, &run_id, RunError::message("run cancelled"));
        break Err(PipelineError::Cancelled { run_id: run_id.clone() });
      }
      _ = &mut sleep => {
        warn!(run_id = %run_id, waited = ?started.elapsed(), "run deadline exceeded");
        fail_through_storage(&db, &run_id, RunError::message("run deadline exceeded"));
        break Err(PipelineError::DeadlineExceeded {
          run_id: run_id.clone(),
          waited: started.elapsed(),
        });
      }
      event = changes.recv() => match event {
        Ok(event) if event.doc.id == run_id => {
          // Loop around and re-evaluate the document.
        }
        Ok(_) => {}
        Err(RecvError::Lagged(skipped)) => {
          warn!(run_id = %run_id, skipped, "change feed lagged at the merge point");
        }
        Err(RecvError::Closed) => {
          error!(run_id = %run_id, "change feed closed before the run resolved");
          break Err(PipelineError::Aborted { run_id: run_id.clone() });
        }
      },
    }
  };

  match &outcome {
    Ok(_) => info!(run_id = %run_id, "pipeline is done"),
    Err(err) => warn!(run_id = %run_id, %err, "pipeline failed"),
  }
  // Receiver may have been dropped; the terminal state is in storage either
  // way.
  let _ = tx.send(outcome);
}

/// Evaluate the run's document: merge when complete, surface an existing
/// terminal state, or report "not yet".
async fn try_resolve(
  db: &Database<RemoteResult>,
  entry: &RegistryEntry,
  request: &StartPipelineRequest,
) -> Option<Result<Value, PipelineError>> {
  let doc = db.get(&request.run_id)?;

  if doc.is_terminal() {
    return Some(match doc.merged {
      Some(merged) => Ok(merged),
      None => Err(PipelineError::RunFailed {
        run_id: request.run_id.clone(),
        error: doc
          .error
          .unwrap_or_else(|| RunError::message("run errored without detail")),
      }),
    });
  }

  if !doc.has_all(&request.clients) {
    return None;
  }

  // Full contribution set: reduce it and write the terminal document back
  // through the shared channel so every participant observes it.
  let mut doc = doc;
  match entry.executor.merge(&doc.contributions).await {
    Ok(merged) => {
      doc.complete(merged.clone());
      if let Err(err) = db.put(doc) {
        error!(run_id = %request.run_id, %err, "failed to persist merged result");
      }
      Some(Ok(merged))
    }
    Err(step_err) => {
      let captured = RunError::from_error(&step_err, None);
      doc.fail(captured.clone());
      if let Err(err) = db.put(doc) {
        error!(run_id = %request.run_id, %err, "failed to persist errored result");
      }
      Some(Err(PipelineError::RunFailed {
        run_id: request.run_id.clone(),
        error: captured,
      }))
    }
  }
}

/// Force the run's document to an errored terminal state so participants
/// observe the failure through replication. A no-op if the document was
/// never created or is already terminal.
fn fail_through_storage(db: &Database<RemoteResult>, run_id: &str, error: RunError) {
  if let Some(mut doc) = db.get(run_id) {
    doc.fail(error);
    if let Err(err) = db.put(doc) {
      error!(run_id, %err, "failed to persist run failure");
    }
  }
}
