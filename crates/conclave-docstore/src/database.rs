//! A single named database replica.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, trace};

use conclave_model::Document;

use crate::StoreError;
use crate::hub::ReplicationHub;

const CHANGE_FEED_CAPACITY: usize = 256;

/// Kind of change observed on a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
  Insert,
  Update,
  Delete,
}

/// One change-feed event. Events arrive in delivery order, which for
/// replicated writes is not the logical write order across participants.
#[derive(Debug, Clone)]
pub struct ChangeEvent<D> {
  pub kind: ChangeKind,
  pub doc: D,
}

/// One replica of a named database, holding typed documents.
///
/// Cloning is cheap and clones share the same replica. A `put` acknowledges
/// as soon as the local replica has applied the write; visibility on sibling
/// replicas follows asynchronously via the hub.
pub struct Database<D: Document> {
  name: String,
  shared: Arc<DbShared<D>>,
}

impl<D: Document> Clone for Database<D> {
  fn clone(&self) -> Self {
    Self {
      name: self.name.clone(),
      shared: Arc::clone(&self.shared),
    }
  }
}

struct DbShared<D: Document> {
  docs: Mutex<Vec<D>>,
  changes: broadcast::Sender<ChangeEvent<D>>,
  replication: Option<Outbound>,
}

struct Outbound {
  hub: Arc<ReplicationHub>,
  replica_id: u64,
}

impl<D> Database<D>
where
  D: Document + Serialize + DeserializeOwned,
{
  /// Open an unreplicated (process-local) database.
  pub(crate) fn local(name: &str) -> Self {
    let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
    Self {
      name: name.to_string(),
      shared: Arc::new(DbShared {
        docs: Mutex::new(Vec::new()),
        changes,
        replication: None,
      }),
    }
  }

  /// Open a replica attached to `hub`, spawning its inbound delivery task.
  pub(crate) fn replicated(name: &str, hub: Arc<ReplicationHub>) -> Self {
    let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
    let (tx, rx) = mpsc::unbounded_channel();
    let replica_id = hub.attach(name, tx);

    let shared = Arc::new(DbShared {
      docs: Mutex::new(Vec::new()),
      changes,
      replication: Some(Outbound {
        hub: Arc::clone(&hub),
        replica_id,
      }),
    });

    tokio::spawn(deliver_inbound(
      name.to_string(),
      Arc::clone(&shared),
      hub,
      rx,
    ));

    Self {
      name: name.to_string(),
      shared,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// All live (non-soft-deleted) documents, in local arrival order.
  pub fn all(&self) -> Vec<D> {
    self
      .shared
      .docs
      .lock()
      .expect("database lock poisoned")
      .iter()
      .filter(|doc| !doc.deleted())
      .cloned()
      .collect()
  }

  /// Look up one live document by id.
  pub fn get(&self, id: &str) -> Option<D> {
    self
      .shared
      .docs
      .lock()
      .expect("database lock poisoned")
      .iter()
      .find(|doc| doc.id() == id && !doc.deleted())
      .cloned()
  }

  /// Write a document.
  ///
  /// If a revision with the same id already exists locally, the incoming
  /// revision is combined through [`Document::merge_from`], never blindly
  /// replaced, so concurrent appends from different replicas survive.
  /// Returns once the local replica has applied the write; siblings see it
  /// after replication lag.
  pub fn put(&self, doc: D) -> Result<(), StoreError> {
    let serialized = match &self.shared.replication {
      Some(_) => Some(serde_json::to_value(&doc)?),
      None => None,
    };

    self.shared.apply(doc);

    if let (Some(outbound), Some(value)) = (&self.shared.replication, serialized) {
      outbound.hub.publish(&self.name, outbound.replica_id, value);
    }
    Ok(())
  }

  /// Subscribe to this database's change feed.
  ///
  /// Events are emitted for local writes and for replicated writes as they
  /// are applied, in arrival order. Order across different databases is not
  /// guaranteed.
  pub fn changes(&self) -> broadcast::Receiver<ChangeEvent<D>> {
    self.shared.changes.subscribe()
  }

  /// Wait for in-flight replication involving this database's hub to drain.
  pub async fn sync(&self) {
    if let Some(outbound) = &self.shared.replication {
      outbound.hub.quiesce().await;
    }
  }
}

impl<D: Document> DbShared<D> {
  /// Apply a revision to the local replica and emit the change event.
  fn apply(&self, incoming: D) {
    let event = {
      let mut docs = self.docs.lock().expect("database lock poisoned");
      match docs.iter_mut().find(|doc| doc.id() == incoming.id()) {
        Some(existing) => {
          existing.merge_from(incoming);
          let kind = if existing.deleted() {
            ChangeKind::Delete
          } else {
            ChangeKind::Update
          };
          ChangeEvent {
            kind,
            doc: existing.clone(),
          }
        }
        None => {
          let kind = if incoming.deleted() {
            ChangeKind::Delete
          } else {
            ChangeKind::Insert
          };
          docs.push(incoming.clone());
          ChangeEvent {
            kind,
            doc: incoming,
          }
        }
      }
    };
    // Ignore send errors - nobody may be subscribed.
    let _ = self.changes.send(event);
  }
}

/// Inbound delivery loop for one replica: apply each replicated write after
/// the hub's configured lag.
async fn deliver_inbound<D>(
  db_name: String,
  shared: Arc<DbShared<D>>,
  hub: Arc<ReplicationHub>,
  mut rx: mpsc::UnboundedReceiver<serde_json::Value>,
) where
  D: Document + DeserializeOwned,
{
  let pending = hub.pending_counter();
  while let Some(value) = rx.recv().await {
    tokio::time::sleep(hub.delay()).await;
    match serde_json::from_value::<D>(value) {
      Ok(doc) => {
        trace!(db = %db_name, doc_id = %doc.id(), "applying replicated write");
        shared.apply(doc);
      }
      Err(err) => {
        error!(db = %db_name, %err, "dropping undeserializable replicated document");
      }
    }
    pending.fetch_sub(1, Ordering::SeqCst);
  }
}
