//! The step-execution seam.

use async_trait::async_trait;
use serde_json::Value;

use conclave_model::Contribution;

/// Errors raised by a pipeline step.
///
/// A step error is fatal to the raising client's contribution for the
/// current run; it is captured as data on the run record rather than thrown
/// across the process boundary.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
  /// The computation itself failed.
  #[error("computation failed: {message}")]
  Failed {
    message: String,
    input: Option<Value>,
  },

  /// The step was given an input it cannot work with.
  #[error("invalid step input: {message}")]
  InvalidInput {
    message: String,
    input: Option<Value>,
  },
}

impl StepError {
  /// The input the failing step was given, for error capture.
  pub fn input(&self) -> Option<&Value> {
    match self {
      StepError::Failed { input, .. } | StepError::InvalidInput { input, .. } => input.as_ref(),
    }
  }
}

/// Executes one computation: the local step run on each participant, and
/// the merge reduction applied to the contribution set at the coordination
/// point.
///
/// Implementations wrap whatever actually performs the computation: in
/// production a container resolved from the descriptor's docker image, in
/// simulation an in-process function.
#[async_trait]
pub trait StepExecutor: Send + Sync {
  /// Run the step against this participant's input, producing the output
  /// consumed by the next step (or contributed to the remote result).
  async fn run(&self, input: Value) -> Result<Value, StepError>;

  /// Reduce the full contribution set to the run's merged payload.
  ///
  /// Contributions arrive keyed by client id in arbitrary order; the
  /// reduction must be order-independent.
  async fn merge(&self, contributions: &[Contribution]) -> Result<Value, StepError>;
}
