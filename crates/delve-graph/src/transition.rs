use delve_state::FinalOutput;
use serde::{Deserialize, Serialize};

/// What a dispatched phase asks the executor to do next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
  /// Advance to a declared successor.
  ContinueTo(String),
  /// End the run with a final output. Only terminal phases may succeed.
  Succeed(FinalOutput),
  /// End the run with a phase failure.
  Fail(String),
}

impl Transition {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, Transition::ContinueTo(_))
  }
}
