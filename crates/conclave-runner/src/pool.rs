//! The per-client runner pool.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use conclave_docstore::DbRegistry;
use conclave_model::{
  Contribution, LocalRunState, MergeStatus, RemoteResult, Run, RunError, RunStatus,
  remote_db_name,
};
use conclave_registry::ComputationRegistry;

use crate::error::RunnerError;
use crate::wait::{WaitConfig, WaitError, wait_for_remote_result};

/// Process-local database holding this client's finished run records.
pub const LOCAL_RUNS_DB: &str = "local-runs";

/// Process-local database holding this client's per-run execution state
/// (step progress, artifacts, terminal results or error).
pub const LOCAL_RUN_STATES_DB: &str = "local-run-states";

/// Configuration for a [`LocalRunnerPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
  /// This participant's client id.
  pub client_id: String,
  /// Bound on waiting for the merged result after contributing.
  pub result_wait: WaitConfig,
}

impl PoolConfig {
  pub fn new(client_id: impl Into<String>) -> Self {
    Self {
      client_id: client_id.into(),
      result_wait: WaitConfig::default(),
    }
  }
}

/// Lifecycle of the pool's single run slot.
///
/// `Complete` and `Errored` are terminal; the pool accepts a new run only
/// after an explicit [`LocalRunnerPool::teardown`] returns it to `Idle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolState {
  Idle,
  Running { run_id: String, step: usize },
  Complete { run_id: String },
  Errored { run_id: String },
}

impl PoolState {
  fn run_id(&self) -> Option<&str> {
    match self {
      PoolState::Idle => None,
      PoolState::Running { run_id, .. }
      | PoolState::Complete { run_id }
      | PoolState::Errored { run_id } => Some(run_id),
    }
  }
}

/// Owns one in-flight run at a time and drives its pipeline steps.
///
/// Steps execute strictly in order (step N+1 never starts before step N
/// completes) with each step's output feeding the next step's input. A step
/// failure is captured verbatim onto the run record and aborts only this
/// client's contribution; other participants are unaffected except that the
/// merge cannot complete without this client.
pub struct LocalRunnerPool {
  config: PoolConfig,
  registry: Arc<ComputationRegistry>,
  dbs: Arc<DbRegistry>,
  state: Mutex<PoolState>,
  seqs: Mutex<HashMap<String, u64>>,
}

impl LocalRunnerPool {
  pub fn new(config: PoolConfig, registry: Arc<ComputationRegistry>, dbs: Arc<DbRegistry>) -> Self {
    Self {
      config,
      registry,
      dbs,
      state: Mutex::new(PoolState::Idle),
      seqs: Mutex::new(HashMap::new()),
    }
  }

  pub fn client_id(&self) -> &str {
    &self.config.client_id
  }

  pub fn dbs(&self) -> &Arc<DbRegistry> {
    &self.dbs
  }

  pub fn registry(&self) -> &Arc<ComputationRegistry> {
    &self.registry
  }

  pub fn state(&self) -> PoolState {
    self.state.lock().expect("pool state lock poisoned").clone()
  }

  /// Return the pool to `Idle`. The only path out of a terminal state.
  pub fn teardown(&self) {
    let mut state = self.state.lock().expect("pool state lock poisoned");
    if let Some(run_id) = state.run_id() {
      info!(client_id = %self.config.client_id, run_id, "tearing down runner pool");
      self
        .seqs
        .lock()
        .expect("pool seq lock poisoned")
        .remove(run_id);
    }
    *state = PoolState::Idle;
  }

  /// Execute the run's pipeline against `user_data` and publish this
  /// client's contribution.
  ///
  /// On success the call blocks until the merged terminal result arrives
  /// through replication, then returns the finished local run record (with
  /// `end_date` and `results` set) after persisting it to [`LOCAL_RUNS_DB`].
  /// A step failure yields an `Errored` record with the failure captured as
  /// data, not an `Err`.
  pub async fn trigger_runner(
    &self,
    run: &Run,
    user_data: Value,
    cancel: &CancellationToken,
  ) -> Result<Run, RunnerError> {
    self.occupy(&run.id)?;
    info!(
      client_id = %self.config.client_id,
      run_id = %run.id,
      steps = run.pipeline.steps.len(),
      "runner triggered"
    );

    let mut record = run.clone();
    record.status = RunStatus::Running;
    let mut local_state = LocalRunState::new(&run.id);

    let record = match self
      .execute_steps(run, user_data, &mut local_state, cancel)
      .await
    {
      Ok(output) => {
        local_state.controller_state = String::from("contributing result");
        self
          .contribute_and_finish(record, &mut local_state, output, cancel)
          .await?
      }
      Err(captured) => {
        warn!(
          client_id = %self.config.client_id,
          run_id = %run.id,
          error = %captured.message,
          "run errored"
        );
        local_state.error = Some(captured.clone());
        local_state.controller_state = String::from("errored");
        record.status = RunStatus::Errored;
        record.error = Some(captured);
        record.end_date = Some(Utc::now());
        self.set_state(PoolState::Errored {
          run_id: run.id.clone(),
        });
        record
      }
    };

    self.persist_record(&record, &local_state)?;
    Ok(record)
  }

  /// Run each step in order, feeding outputs forward.
  async fn execute_steps(
    &self,
    run: &Run,
    user_data: Value,
    local_state: &mut LocalRunState,
    cancel: &CancellationToken,
  ) -> Result<Value, RunError> {
    let total = run.pipeline.steps.len();
    let mut input = user_data;

    for (index, step) in run.pipeline.steps.iter().enumerate() {
      if cancel.is_cancelled() {
        return Err(RunError::message(format!(
          "run '{}' cancelled before step {} ({})",
          run.id,
          index + 1,
          step.computation
        )));
      }

      self.set_state(PoolState::Running {
        run_id: run.id.clone(),
        step: index,
      });
      local_state.current_step = index;
      local_state.controller_state =
        format!("running step {} of {} ({})", index + 1, total, step.computation);
      info!(
        client_id = %self.config.client_id,
        run_id = %run.id,
        step = index,
        computation = %step.computation,
        "executing step"
      );

      let entry = match self.registry.get(&step.computation) {
        Ok(entry) => entry,
        Err(err) => return Err(step_failure(index, &step.computation, &err, Some(input))),
      };

      match entry.executor.run(input.clone()).await {
        Ok(output) => {
          local_state
            .artifacts
            .insert(step.computation.clone(), output.clone());
          input = output;
        }
        Err(err) => {
          let failing_input = err.input().cloned().or(Some(input));
          return Err(step_failure(index, &step.computation, &err, failing_input));
        }
      }
    }

    Ok(input)
  }

  /// Publish the contribution and wait for the merged terminal result.
  async fn contribute_and_finish(
    &self,
    mut record: Run,
    local_state: &mut LocalRunState,
    output: Value,
    cancel: &CancellationToken,
  ) -> Result<Run, RunnerError> {
    let remote = self
      .dbs
      .get::<RemoteResult>(&remote_db_name(&record.consortium_id));

    let Some(mut doc) = remote.get(&record.id) else {
      self.set_state(PoolState::Errored {
        run_id: record.id.clone(),
      });
      return Err(RunnerError::MissingRemoteResult {
        run_id: record.id.clone(),
      });
    };

    let seq = self.next_seq(&record.id);
    doc.record_contribution(Contribution::new(
      self.config.client_id.clone(),
      seq,
      output.clone(),
    ));
    remote.put(doc)?;
    info!(
      client_id = %self.config.client_id,
      run_id = %record.id,
      seq,
      "contribution published"
    );

    let terminal = wait_for_remote_result(
      &remote,
      &record.id,
      RemoteResult::is_terminal,
      self.config.result_wait,
      cancel,
    )
    .await;

    match terminal {
      Ok(doc) => {
        record.end_date = Some(Utc::now());
        if doc.status == MergeStatus::Complete {
          record.status = RunStatus::Complete;
          record.results = doc.merged;
          local_state.results = record.results.clone();
          local_state.controller_state = String::from("complete");
          self.set_state(PoolState::Complete {
            run_id: record.id.clone(),
          });
        } else {
          record.status = RunStatus::Errored;
          record.error = doc.error;
          local_state.error = record.error.clone();
          local_state.controller_state = String::from("errored");
          self.set_state(PoolState::Errored {
            run_id: record.id.clone(),
          });
        }
        Ok(record)
      }
      Err(WaitError::Timeout { waited, .. }) => {
        self.set_state(PoolState::Errored {
          run_id: record.id.clone(),
        });
        Err(RunnerError::ResultTimeout {
          run_id: record.id.clone(),
          waited,
        })
      }
      Err(WaitError::Cancelled { .. }) => {
        self.set_state(PoolState::Errored {
          run_id: record.id.clone(),
        });
        Err(RunnerError::Cancelled {
          run_id: record.id.clone(),
        })
      }
    }
  }

  /// Claim the single run slot.
  fn occupy(&self, run_id: &str) -> Result<(), RunnerError> {
    let mut state = self.state.lock().expect("pool state lock poisoned");
    if let Some(occupied_by) = state.run_id() {
      return Err(RunnerError::Occupied {
        run_id: occupied_by.to_string(),
      });
    }
    *state = PoolState::Running {
      run_id: run_id.to_string(),
      step: 0,
    };
    Ok(())
  }

  fn set_state(&self, next: PoolState) {
    *self.state.lock().expect("pool state lock poisoned") = next;
  }

  /// Next contribution sequence number for a run. Resubmissions get a
  /// higher seq so the merge's last-write-wins policy applies cleanly.
  fn next_seq(&self, run_id: &str) -> u64 {
    let mut seqs = self.seqs.lock().expect("pool seq lock poisoned");
    let seq = seqs.entry(run_id.to_string()).or_insert(0);
    *seq += 1;
    *seq
  }

  /// Persist the finished run record and its execution state to the
  /// client's process-local databases.
  fn persist_record(&self, record: &Run, local_state: &LocalRunState) -> Result<(), RunnerError> {
    self
      .dbs
      .get_local::<Run>(LOCAL_RUNS_DB)
      .put(record.clone())?;
    self
      .dbs
      .get_local::<LocalRunState>(LOCAL_RUN_STATES_DB)
      .put(local_state.clone())?;
    Ok(())
  }
}

/// Capture a step failure with the step's identity and failing input.
fn step_failure(
  index: usize,
  computation: &str,
  err: &(dyn std::error::Error + 'static),
  input: Option<Value>,
) -> RunError {
  let mut captured = RunError::from_error(err, input);
  captured.error = Some(json!({
    "step": index,
    "computation": computation,
  }));
  captured
}
