//! One simulated participant process.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use conclave_docstore::{DbRegistry, ReplicationHub};
use conclave_model::Run;
use conclave_registry::ComputationRegistry;
use conclave_runner::{KickoffConfig, LocalRunnerPool, PoolConfig, kickoff};

use crate::computations::register_builtins;
use crate::decl::SimDecl;
use crate::error::SimError;

/// Messages from the harness to a participant.
#[derive(Debug, Clone)]
pub enum ParentMessage {
  Boot { decl_path: PathBuf, username: String },
  Kickoff,
  Teardown,
}

/// Messages from a participant back to the harness.
#[derive(Debug, Clone)]
pub enum ClientMessage {
  /// Boot finished; the participant is ready to kick off.
  Ready { result: Value },
  /// Teardown finished; the participant's task is exiting.
  Toredown,
}

/// Harness-side handle to one participant task.
pub struct ClientHandle {
  pub username: String,
  tx: mpsc::UnboundedSender<ParentMessage>,
  rx: mpsc::UnboundedReceiver<ClientMessage>,
  run_record: watch::Receiver<Option<Run>>,
  task: JoinHandle<Result<(), SimError>>,
}

impl ClientHandle {
  pub fn send(&self, message: ParentMessage) -> Result<(), SimError> {
    self.tx.send(message).map_err(|_| SimError::ChannelClosed {
      username: self.username.clone(),
    })
  }

  pub async fn recv(&mut self) -> Option<ClientMessage> {
    self.rx.recv().await
  }

  /// Wait for this participant's run to reach a terminal record.
  pub async fn wait_run_record(&mut self) -> Result<Run, SimError> {
    loop {
      if let Some(record) = self.run_record.borrow().clone() {
        return Ok(record);
      }
      if self.run_record.changed().await.is_err() {
        return Err(SimError::ChannelClosed {
          username: self.username.clone(),
        });
      }
    }
  }

  /// Wait for the participant task to exit, surfacing protocol violations.
  pub async fn join(self) -> Result<(), SimError> {
    match self.task.await {
      Ok(result) => result,
      Err(_) => Err(SimError::Protocol(format!(
        "client '{}' task panicked",
        self.username
      ))),
    }
  }
}

/// Spawn a participant task attached to the shared replication hub.
pub fn spawn_client(username: &str, hub: Arc<ReplicationHub>) -> ClientHandle {
  let (parent_tx, parent_rx) = mpsc::unbounded_channel();
  let (client_tx, client_rx) = mpsc::unbounded_channel();
  let (record_tx, record_rx) = watch::channel(None);

  let task = tokio::spawn(client_loop(
    username.to_string(),
    hub,
    parent_rx,
    client_tx,
    Arc::new(record_tx),
  ));

  ClientHandle {
    username: username.to_string(),
    tx: parent_tx,
    rx: client_rx,
    run_record: record_rx,
    task,
  }
}

struct BootedClient {
  decl: SimDecl,
  pool: Arc<LocalRunnerPool>,
  cancel: CancellationToken,
}

/// The participant's message loop.
///
/// `Boot` must arrive first and exactly once; `Kickoff` starts the run
/// without blocking the loop (so `Teardown` can still cancel it); any
/// out-of-order message is a fatal protocol violation.
async fn client_loop(
  username: String,
  hub: Arc<ReplicationHub>,
  mut parent_rx: mpsc::UnboundedReceiver<ParentMessage>,
  client_tx: mpsc::UnboundedSender<ClientMessage>,
  record_tx: Arc<watch::Sender<Option<Run>>>,
) -> Result<(), SimError> {
  let mut booted: Option<BootedClient> = None;

  while let Some(message) = parent_rx.recv().await {
    match message {
      ParentMessage::Boot { decl_path, username: boot_username } => {
        if booted.is_some() {
          return Err(SimError::Protocol(format!(
            "client '{username}' booted twice"
          )));
        }
        if boot_username != username {
          return Err(SimError::Protocol(format!(
            "boot message for '{boot_username}' delivered to '{username}'"
          )));
        }

        let decl = SimDecl::load(&decl_path).await?;
        let dbs = Arc::new(DbRegistry::replicated(&username, Arc::clone(&hub)));
        let registry = Arc::new(ComputationRegistry::new());
        register_builtins(&registry);
        let pool = Arc::new(LocalRunnerPool::new(
          PoolConfig::new(&username),
          registry,
          dbs,
        ));

        info!(client_id = %username, "client booted");
        booted = Some(BootedClient {
          decl,
          pool,
          cancel: CancellationToken::new(),
        });
        let _ = client_tx.send(ClientMessage::Ready {
          result: json!({ "username": username }),
        });
      }

      ParentMessage::Kickoff => {
        let Some(client) = booted.as_ref() else {
          return Err(SimError::Protocol(format!(
            "client '{username}' received kickoff before boot"
          )));
        };
        let Some(user) = client.decl.user(&username) else {
          return Err(SimError::Protocol(format!(
            "client '{username}' is not declared in the decl file"
          )));
        };

        let config = KickoffConfig::new(
          client.decl.run_id.clone(),
          client.decl.usernames(),
          user.user_data_or_default(),
        );
        let pool = Arc::clone(&client.pool);
        let cancel = client.cancel.clone();
        let record_tx = Arc::clone(&record_tx);
        let username = username.clone();
        tokio::spawn(async move {
          match kickoff(&pool, config, &cancel).await {
            Ok(record) => {
              let _ = record_tx.send(Some(record));
            }
            Err(err) => {
              error!(client_id = %username, %err, "kickoff failed");
            }
          }
        });
      }

      ParentMessage::Teardown => {
        if let Some(client) = booted.take() {
          client.cancel.cancel();
          client.pool.teardown();
        }
        info!(client_id = %username, "client torn down");
        let _ = client_tx.send(ClientMessage::Toredown);
        return Ok(());
      }
    }
  }

  Ok(())
}
