use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of run failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  /// Bad graph definition. Caught when the graph is built.
  Config,
  /// The run exhausted its dispatch budget.
  IterationLimitExceeded,
  /// The language-model gateway failed. Never retried by the engine.
  Gateway,
  /// A tool invocation failed. Normally absorbed into the reasoning context.
  Tool,
  /// A sub-task unit timed out. Normally absorbed into the reasoning context.
  UnitTimeout,
  /// The run was cancelled or timed out.
  Cancelled,
  /// A phase failed or broke its execution contract.
  PhaseFailed,
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      ErrorKind::Config => "config_error",
      ErrorKind::IterationLimitExceeded => "iteration_limit_exceeded",
      ErrorKind::Gateway => "gateway_error",
      ErrorKind::Tool => "tool_error",
      ErrorKind::UnitTimeout => "unit_timeout",
      ErrorKind::Cancelled => "cancelled",
      ErrorKind::PhaseFailed => "phase_failed",
    };
    f.write_str(s)
  }
}

/// Caller-visible failure of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RunError {
  pub kind: ErrorKind,
  pub message: String,
}

impl RunError {
  pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
    }
  }
}

/// Errors raised when mutating a [`StateRecord`](crate::StateRecord).
#[derive(Debug, thiserror::Error)]
pub enum StateError {
  /// The record already carries a final output or an error.
  #[error("state record is sealed")]
  Sealed,

  /// A stored value could not be decoded.
  #[error("malformed context value at '{key}': {source}")]
  Malformed {
    key: String,
    #[source]
    source: serde_json::Error,
  },
}
