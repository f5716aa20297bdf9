//! Delivery of merged results to the store of record.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::TransportError;

const SAVE_RESULTS_MUTATION: &str =
  "mutation($runId: ID!, $results: JSON) { saveResults(runId: $runId, results: $results) { id } }";

/// Configuration for the results client.
#[derive(Debug, Clone)]
pub struct ResultsConfig {
  /// Base URL of the API server (exposes `/authenticate` and `/graphql`).
  pub base_url: String,
  /// Credentials posted to `/authenticate` to obtain a bearer token.
  pub credentials: Value,
  /// Delivery attempts before giving up.
  pub max_attempts: usize,
  /// Delay between delivery attempts.
  pub retry_delay: Duration,
}

impl ResultsConfig {
  pub fn new(base_url: impl Into<String>, credentials: Value) -> Self {
    Self {
      base_url: base_url.into(),
      credentials,
      max_attempts: 3,
      retry_delay: Duration::from_millis(500),
    }
  }
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
  id_token: Option<String>,
}

/// Posts a run's merged results to the saveResults mutation, authenticating
/// first. Delivery failures are retried a bounded number of times; a run
/// whose delivery ultimately fails still has its terminal result in shared
/// storage, but not in the store of record.
pub struct ResultsClient {
  http: reqwest::Client,
  config: ResultsConfig,
}

impl ResultsClient {
  pub fn new(config: ResultsConfig) -> Self {
    Self {
      http: reqwest::Client::new(),
      config,
    }
  }

  /// The GraphQL request body for one delivery.
  pub fn mutation_body(run_id: &str, results: &Value) -> Value {
    json!({
      "query": SAVE_RESULTS_MUTATION,
      "variables": {
        "runId": run_id,
        "results": results,
      },
    })
  }

  /// Obtain a bearer token for the delivery call.
  async fn authenticate(&self) -> Result<String, TransportError> {
    let response = self
      .http
      .post(format!("{}/authenticate", self.config.base_url))
      .json(&self.config.credentials)
      .send()
      .await?
      .error_for_status()?;
    let auth: AuthResponse = response.json().await?;
    auth.id_token.ok_or(TransportError::MissingToken)
  }

  async fn deliver_once(&self, run_id: &str, results: &Value) -> Result<(), TransportError> {
    let token = self.authenticate().await?;
    self
      .http
      .post(format!("{}/graphql", self.config.base_url))
      .bearer_auth(token)
      .json(&Self::mutation_body(run_id, results))
      .send()
      .await?
      .error_for_status()?;
    Ok(())
  }

  /// Deliver the merged results, retrying on transport failure.
  pub async fn save_results(&self, run_id: &str, results: &Value) -> Result<(), TransportError> {
    let mut last_err = None;
    for attempt in 1..=self.config.max_attempts {
      match self.deliver_once(run_id, results).await {
        Ok(()) => {
          debug!(run_id, attempt, "results saved");
          return Ok(());
        }
        Err(err) => {
          warn!(run_id, attempt, %err, "results delivery failed");
          last_err = Some(err);
          if attempt < self.config.max_attempts {
            tokio::time::sleep(self.config.retry_delay).await;
          }
        }
      }
    }
    Err(last_err.unwrap_or(TransportError::MissingToken))
  }
}
