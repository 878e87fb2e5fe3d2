use delve_state::{ErrorKind, FinalOutput, RunError, StateRecord};
use serde::{Deserialize, Serialize};

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
  Pending,
  Running,
  Succeeded,
  Failed,
  Cancelled,
}

impl RunStatus {
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled
    )
  }

  /// Legal moves: `Pending -> Running`, and from a non-terminal state to any
  /// terminal one. Terminal states never move again.
  pub fn can_transition_to(self, next: RunStatus) -> bool {
    match (self, next) {
      (RunStatus::Pending, RunStatus::Running) => true,
      (RunStatus::Pending | RunStatus::Running, next) => next.is_terminal(),
      _ => false,
    }
  }
}

/// One committed dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTransition {
  pub phase: String,
  /// Branch outcome for decide and tool-loop phases; `next`, `succeed` or
  /// `fail` for the others.
  pub outcome: String,
}

/// Everything a finished run hands back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
  pub run_id: String,
  pub status: RunStatus,
  /// Final state record, sealed with either a final output or an error.
  pub state: StateRecord,
  pub transitions: Vec<PhaseTransition>,
  /// Phase dispatches charged against the budget.
  pub dispatches: u32,
}

impl RunReport {
  pub fn final_output(&self) -> Option<&FinalOutput> {
    self.state.final_output()
  }

  pub fn error(&self) -> Option<&RunError> {
    self.state.error()
  }

  pub fn into_result(self) -> Result<FinalOutput, RunError> {
    if let Some(error) = self.state.error() {
      return Err(error.clone());
    }
    self.state.final_output().cloned().ok_or_else(|| {
      RunError::new(ErrorKind::PhaseFailed, "run finished without a final output")
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_transitions() {
    assert!(RunStatus::Pending.can_transition_to(RunStatus::Running));
    assert!(RunStatus::Pending.can_transition_to(RunStatus::Failed));
    assert!(RunStatus::Running.can_transition_to(RunStatus::Succeeded));
    assert!(RunStatus::Running.can_transition_to(RunStatus::Cancelled));

    assert!(!RunStatus::Running.can_transition_to(RunStatus::Pending));
    assert!(!RunStatus::Running.can_transition_to(RunStatus::Running));
    assert!(!RunStatus::Succeeded.can_transition_to(RunStatus::Failed));
    assert!(!RunStatus::Cancelled.can_transition_to(RunStatus::Running));
  }
}
