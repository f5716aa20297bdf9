//! Per-process registry of named databases.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;

use conclave_model::Document;

use crate::database::Database;
use crate::hub::ReplicationHub;

/// Owns the database replicas of one participant process.
///
/// Repeated `get` calls for the same name return the same replica, so every
/// part of a process observes its own writes immediately. Registries built
/// with [`DbRegistry::replicated`] attach their databases to a hub;
/// [`DbRegistry::local`] registries never replicate, which is what
/// simulation uses for private per-client state.
pub struct DbRegistry {
  client_id: String,
  hub: Option<Arc<ReplicationHub>>,
  dbs: Mutex<HashMap<String, Box<dyn Any + Send>>>,
}

impl DbRegistry {
  pub fn replicated(client_id: impl Into<String>, hub: Arc<ReplicationHub>) -> Self {
    Self {
      client_id: client_id.into(),
      hub: Some(hub),
      dbs: Mutex::new(HashMap::new()),
    }
  }

  pub fn local(client_id: impl Into<String>) -> Self {
    Self {
      client_id: client_id.into(),
      hub: None,
      dbs: Mutex::new(HashMap::new()),
    }
  }

  /// The owning participant's client id.
  pub fn client_id(&self) -> &str {
    &self.client_id
  }

  /// Get (or open) the named database.
  ///
  /// A database name is bound to one document type for the life of the
  /// process; opening it under a second type is a programming error.
  pub fn get<D>(&self, name: &str) -> Database<D>
  where
    D: Document + Serialize + DeserializeOwned,
  {
    let mut dbs = self.dbs.lock().expect("db registry lock poisoned");
    if let Some(existing) = dbs.get(name) {
      return existing
        .downcast_ref::<Database<D>>()
        .expect("database opened with a different document type")
        .clone();
    }

    let db = match &self.hub {
      Some(hub) => Database::replicated(name, Arc::clone(hub)),
      None => Database::local(name),
    };
    dbs.insert(name.to_string(), Box::new(db.clone()));
    db
  }

  /// Get (or open) a process-local database, never replicated even when the
  /// registry itself is attached to a hub.
  pub fn get_local<D>(&self, name: &str) -> Database<D>
  where
    D: Document + Serialize + DeserializeOwned,
  {
    let mut dbs = self.dbs.lock().expect("db registry lock poisoned");
    if let Some(existing) = dbs.get(name) {
      return existing
        .downcast_ref::<Database<D>>()
        .expect("database opened with a different document type")
        .clone();
    }

    let db = Database::local(name);
    dbs.insert(name.to_string(), Box::new(db.clone()));
    db
  }
}
