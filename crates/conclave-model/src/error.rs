//! Run-level error capture.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A failure captured as data on a run or remote-result document.
///
/// Step and kickoff failures are never thrown across the process boundary;
/// they are attached here so every participant (and the UI layer) observes
/// failure through the same asynchronous channel as success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
  /// Human-readable failure message, captured verbatim.
  pub message: String,
  /// Error chain / backtrace text, when one was available.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub stack: Option<String>,
  /// Machine-readable error detail.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<Value>,
  /// The input the failing operation was given, for diagnosis.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub input: Option<Value>,
}

impl RunError {
  /// Capture a plain message with no further context.
  pub fn message(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      stack: None,
      error: None,
      input: None,
    }
  }

  /// Capture an error value, recording its `Display` rendering and its full
  /// source chain as the stack text.
  pub fn from_error(err: &(dyn std::error::Error + 'static), input: Option<Value>) -> Self {
    let mut stack = Vec::new();
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
      stack.push(e.to_string());
      current = e.source();
    }

    Self {
      message: err.to_string(),
      stack: Some(stack.join("\ncaused by: ")),
      error: None,
      input,
    }
  }
}

impl std::fmt::Display for RunError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.message)
  }
}
