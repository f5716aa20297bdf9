//! Builtin computations stubbed into the registry at boot.
//!
//! Real deployments distribute computations as container images; the
//! simulator short-circuits that by registering in-process executors under
//! the same ids the decl and the pipeline snapshot reference.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use conclave_model::{ComputationDescriptor, Contribution};
use conclave_registry::{ComputationRegistry, StepError, StepExecutor};

/// Extracts each participant's declared `value`; merge sums them.
struct SumValues;

#[async_trait]
impl StepExecutor for SumValues {
  async fn run(&self, input: Value) -> Result<Value, StepError> {
    input
      .get("value")
      .cloned()
      .ok_or_else(|| StepError::InvalidInput {
        message: String::from("user data carries no 'value' field"),
        input: Some(input.clone()),
      })
  }

  async fn merge(&self, contributions: &[Contribution]) -> Result<Value, StepError> {
    let mut total = 0.0;
    for c in contributions {
      total += c.data.as_f64().ok_or_else(|| StepError::InvalidInput {
        message: format!("non-numeric contribution from '{}'", c.client_id),
        input: Some(c.data.clone()),
      })?;
    }
    // Integral totals render as integers.
    if total.fract() == 0.0 {
      Ok(json!(total as i64))
    } else {
      Ok(json!(total))
    }
  }
}

/// Like `sum`, but the merge averages across participants.
struct MeanValues;

#[async_trait]
impl StepExecutor for MeanValues {
  async fn run(&self, input: Value) -> Result<Value, StepError> {
    SumValues.run(input).await
  }

  async fn merge(&self, contributions: &[Contribution]) -> Result<Value, StepError> {
    if contributions.is_empty() {
      return Err(StepError::InvalidInput {
        message: String::from("cannot average an empty contribution set"),
        input: None,
      });
    }
    let total = SumValues.merge(contributions).await?;
    let total = total.as_f64().unwrap_or(0.0);
    Ok(json!(total / contributions.len() as f64))
  }
}

fn descriptor(image: &str, name: &str) -> ComputationDescriptor {
  ComputationDescriptor {
    docker_image: image.to_string(),
    display: json!({ "name": name }),
    input: json!({ "value": "number" }),
    output: json!("number"),
  }
}

/// Look up a builtin computation by id.
pub fn builtin(name: &str) -> Option<(ComputationDescriptor, Arc<dyn StepExecutor>)> {
  match name {
    "sum" => Some((descriptor("conclave/sum:1", "sum"), Arc::new(SumValues))),
    "mean" => Some((descriptor("conclave/mean:1", "mean"), Arc::new(MeanValues))),
    _ => None,
  }
}

/// Register every builtin on a freshly booted registry.
pub fn register_builtins(registry: &ComputationRegistry) {
  for name in ["sum", "mean"] {
    let (descriptor, executor) = builtin(name).expect("builtin list out of sync");
    registry.register(name, descriptor, executor);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn contributions(values: &[(&str, f64)]) -> Vec<Contribution> {
    values
      .iter()
      .map(|(client, v)| Contribution::new(*client, 1, json!(v)))
      .collect()
  }

  #[tokio::test]
  async fn sum_reduces_contributions_order_independently() {
    let (_, sum) = builtin("sum").unwrap();
    let forward = contributions(&[("alice", 2.0), ("bob", 3.0)]);
    let mut reverse = forward.clone();
    reverse.reverse();

    assert_eq!(sum.merge(&forward).await.unwrap(), json!(5));
    assert_eq!(sum.merge(&reverse).await.unwrap(), json!(5));
  }

  #[tokio::test]
  async fn mean_averages_across_participants() {
    let (_, mean) = builtin("mean").unwrap();
    let set = contributions(&[("alice", 2.0), ("bob", 4.0)]);
    assert_eq!(mean.merge(&set).await.unwrap(), json!(3.0));
  }

  #[tokio::test]
  async fn sum_rejects_user_data_without_value() {
    let (_, sum) = builtin("sum").unwrap();
    let err = sum.run(json!({ "kickoff": true })).await.unwrap_err();
    assert!(matches!(err, StepError::InvalidInput { .. }));
  }
}
