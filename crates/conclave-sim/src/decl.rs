//! Simulation declaration files.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SimError;

fn default_run_id() -> String {
  String::from("test_run_id")
}

/// One declared participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimUser {
  pub username: String,
  /// Input to the participant's first pipeline step. Defaults to a generic
  /// kickoff marker when absent.
  #[serde(default, alias = "userData", skip_serializing_if = "Option::is_none")]
  pub user_data: Option<Value>,
}

impl SimUser {
  pub fn user_data_or_default(&self) -> Value {
    self
      .user_data
      .clone()
      .unwrap_or_else(|| serde_json::json!({ "kickoff": true }))
  }
}

/// A simulation declaration: who participates, with what data, running
/// which builtin computation. User order matters: position 0 is the
/// initiator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimDecl {
  #[serde(default = "default_run_id")]
  pub run_id: String,
  pub users: Vec<SimUser>,
  /// Builtin computation id (see [`crate::builtin`]).
  pub computation: String,
  #[serde(default)]
  pub verbose: bool,
}

impl SimDecl {
  pub async fn load(path: &Path) -> Result<Self, SimError> {
    let text = tokio::fs::read_to_string(path)
      .await
      .map_err(|source| SimError::DeclRead {
        path: path.to_path_buf(),
        source,
      })?;
    serde_json::from_str(&text).map_err(|source| SimError::DeclParse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Participant client ids in declared order.
  pub fn usernames(&self) -> Vec<String> {
    self.users.iter().map(|u| u.username.clone()).collect()
  }

  pub fn user(&self, username: &str) -> Option<&SimUser> {
    self.users.iter().find(|u| u.username == username)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn decl_parses_with_defaults() {
    let decl: SimDecl = serde_json::from_str(
      r#"{
        "users": [
          { "username": "alice", "user_data": { "value": 2 } },
          { "username": "bob" }
        ],
        "computation": "sum"
      }"#,
    )
    .unwrap();

    assert_eq!(decl.run_id, "test_run_id");
    assert_eq!(decl.usernames(), vec!["alice", "bob"]);
    assert_eq!(
      decl.user("bob").unwrap().user_data_or_default(),
      serde_json::json!({ "kickoff": true })
    );
    assert!(!decl.verbose);
  }
}
