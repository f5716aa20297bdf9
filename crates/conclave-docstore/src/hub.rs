//! In-process replication between database replicas.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

/// Routes writes between replicas of the same named database.
///
/// Every [`Database`](crate::Database) opened against a hub attaches an
/// inbound delivery channel under its database name. A write on one replica
/// is fanned out to every sibling replica of that name; each sibling applies
/// it only after the configured replication delay, which is what models
/// replication lag. A replica that attaches late receives the database's
/// full write history through the same delayed path (initial sync). Delivery
/// is FIFO per replica but carries no ordering guarantee across databases or
/// across writers.
pub struct ReplicationHub {
  delay: Duration,
  next_replica_id: AtomicU64,
  pending: Arc<AtomicUsize>,
  databases: Mutex<HashMap<String, DbChannel>>,
}

#[derive(Default)]
struct DbChannel {
  replicas: Vec<ReplicaLink>,
  /// Every write ever published to this database, in arrival order. Backfilled
  /// to late-attaching replicas in place of a real sync protocol.
  history: Vec<serde_json::Value>,
}

struct ReplicaLink {
  replica_id: u64,
  tx: mpsc::UnboundedSender<serde_json::Value>,
}

impl ReplicationHub {
  pub fn new(delay: Duration) -> Arc<Self> {
    Arc::new(Self {
      delay,
      next_replica_id: AtomicU64::new(0),
      pending: Arc::new(AtomicUsize::new(0)),
      databases: Mutex::new(HashMap::new()),
    })
  }

  /// Artificial replication delay applied before a sibling replica sees a
  /// write.
  pub fn delay(&self) -> Duration {
    self.delay
  }

  /// Register a replica's inbound channel, deliver the write history to it,
  /// and return its hub-wide id.
  pub(crate) fn attach(&self, db_name: &str, tx: mpsc::UnboundedSender<serde_json::Value>) -> u64 {
    let replica_id = self.next_replica_id.fetch_add(1, Ordering::Relaxed);
    let mut databases = self.databases.lock().expect("replication hub lock poisoned");
    let channel = databases.entry(db_name.to_string()).or_default();

    for doc in &channel.history {
      self.pending.fetch_add(1, Ordering::SeqCst);
      if tx.send(doc.clone()).is_err() {
        self.pending.fetch_sub(1, Ordering::SeqCst);
      }
    }

    channel.replicas.push(ReplicaLink { replica_id, tx });
    replica_id
  }

  /// Fan a serialized write out to every sibling replica of `db_name`.
  pub(crate) fn publish(&self, db_name: &str, origin: u64, doc: serde_json::Value) {
    let mut databases = self.databases.lock().expect("replication hub lock poisoned");
    let channel = databases.entry(db_name.to_string()).or_default();
    channel.history.push(doc.clone());

    channel.replicas.retain(|link| {
      if link.replica_id == origin {
        return true;
      }
      self.pending.fetch_add(1, Ordering::SeqCst);
      // A closed channel means the replica's delivery task is gone; drop the
      // link so we stop counting deliveries toward it.
      match link.tx.send(doc.clone()) {
        Ok(()) => true,
        Err(_) => {
          self.pending.fetch_sub(1, Ordering::SeqCst);
          false
        }
      }
    });
  }

  pub(crate) fn pending_counter(&self) -> Arc<AtomicUsize> {
    Arc::clone(&self.pending)
  }

  /// Wait until every in-flight replication delivery has been applied.
  ///
  /// Test and harness convenience; production callers wait on change feeds
  /// instead.
  pub async fn quiesce(&self) {
    while self.pending.load(Ordering::SeqCst) > 0 {
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
  }
}
