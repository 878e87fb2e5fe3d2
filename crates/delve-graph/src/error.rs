use delve_capability::GatewayError;
use delve_state::{ErrorKind, StateError};
use thiserror::Error;

/// Errors detected while building a graph. A graph with any of these is never
/// constructed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
  #[error("entry phase '{0}' is not declared")]
  UnknownEntry(String),

  #[error("phase '{0}' is declared more than once")]
  DuplicatePhase(String),

  #[error("edge references unknown phase: from={from}, to={to}")]
  UnknownPhase { from: String, to: String },

  #[error("terminal phase '{0}' is not declared")]
  UnknownTerminal(String),

  #[error("graph declares no terminal phase")]
  NoTerminal,

  #[error("terminal phase '{phase}' must be a transform, found {kind}")]
  InvalidTerminal { phase: String, kind: &'static str },

  #[error("phase '{phase}' declares no outcomes")]
  NoOutcomes { phase: String },

  #[error("phase '{phase}' has no branch for outcome '{outcome}'")]
  UnmappedOutcome { phase: String, outcome: String },

  #[error("phase '{phase}' branches on undeclared outcome '{outcome}'")]
  UndeclaredOutcome { phase: String, outcome: String },

  #[error("phase '{0}' has no successor")]
  MissingSuccessor(String),

  #[error("phase '{phase}' has more than one successor: {successors:?}")]
  AmbiguousSuccessor {
    phase: String,
    successors: Vec<String>,
  },

  #[error("phase '{phase}' cannot have {edge} edges")]
  MisplacedEdge { phase: String, edge: &'static str },

  #[error("phase '{phase}' reads '{key}' but no phase writes it")]
  UnwrittenRead { phase: String, key: String },

  #[error("phase '{phase}' has invalid limit: {message}")]
  InvalidLimit { phase: String, message: String },
}

/// Errors raised while a phase runs.
///
/// Tool and unit failures never surface here; they are folded into the
/// state record. Everything below is run-fatal.
#[derive(Debug, Error)]
pub enum PhaseError {
  #[error("phase cancelled")]
  Cancelled,

  #[error(transparent)]
  Gateway(#[from] GatewayError),

  #[error("phase '{phase}' failed: {message}")]
  Failed { phase: String, message: String },

  /// The phase broke the executor contract (rewrote history, wrote an
  /// undeclared key, returned an illegal transition, ...).
  #[error("phase '{phase}' violated its contract: {message}")]
  Contract { phase: String, message: String },

  #[error(transparent)]
  State(#[from] StateError),
}

impl PhaseError {
  pub fn failed(phase: impl Into<String>, message: impl Into<String>) -> Self {
    Self::Failed {
      phase: phase.into(),
      message: message.into(),
    }
  }

  pub fn contract(phase: impl Into<String>, message: impl Into<String>) -> Self {
    Self::Contract {
      phase: phase.into(),
      message: message.into(),
    }
  }

  /// Error kind recorded on the state record when this error ends a run.
  pub fn kind(&self) -> ErrorKind {
    match self {
      PhaseError::Cancelled => ErrorKind::Cancelled,
      PhaseError::Gateway(_) => ErrorKind::Gateway,
      PhaseError::Failed { .. } | PhaseError::Contract { .. } | PhaseError::State(_) => {
        ErrorKind::PhaseFailed
      }
    }
  }
}
