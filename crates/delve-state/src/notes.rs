use std::ops::Deref;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Outcome recorded for a research note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteStatus {
  Ok,
  ToolFailed,
  UnitTimedOut,
  UnitFailed,
  /// The gateway asked for something the phase does not allow.
  Rejected,
}

impl NoteStatus {
  /// Whether the note stands for research that did not happen. A rejected
  /// request is not a research failure.
  pub fn is_failure(self) -> bool {
    matches!(
      self,
      NoteStatus::ToolFailed | NoteStatus::UnitTimedOut | NoteStatus::UnitFailed
    )
  }
}

/// One entry in the `research.notes` namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchNote {
  /// Tool (or phase) that produced the note.
  pub source: String,
  /// Sub-goal the note answers, when the producer was given one.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub goal: Option<String>,
  pub content: String,
  pub status: NoteStatus,
}

impl ResearchNote {
  pub fn ok(source: impl Into<String>, content: impl Into<String>) -> Self {
    Self {
      source: source.into(),
      goal: None,
      content: content.into(),
      status: NoteStatus::Ok,
    }
  }

  pub fn failed(source: impl Into<String>, status: NoteStatus, content: impl Into<String>) -> Self {
    Self {
      source: source.into(),
      goal: None,
      content: content.into(),
      status,
    }
  }

  pub fn with_goal(mut self, goal: Option<String>) -> Self {
    self.goal = goal;
    self
  }
}

/// Read-only snapshot of the notes accumulated so far.
///
/// Handed to concurrent units instead of the state record itself.
#[derive(Debug, Clone)]
pub struct NotesSnapshot(Arc<[ResearchNote]>);

impl NotesSnapshot {
  pub fn new(notes: Vec<ResearchNote>) -> Self {
    Self(notes.into())
  }
}

impl Default for NotesSnapshot {
  fn default() -> Self {
    Self::new(Vec::new())
  }
}

impl Deref for NotesSnapshot {
  type Target = [ResearchNote];

  fn deref(&self) -> &Self::Target {
    &self.0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_failure_statuses() {
    assert!(!NoteStatus::Ok.is_failure());
    assert!(!NoteStatus::Rejected.is_failure());
    assert!(NoteStatus::ToolFailed.is_failure());
    assert!(NoteStatus::UnitTimedOut.is_failure());
    assert!(NoteStatus::UnitFailed.is_failure());
  }

  #[test]
  fn test_snapshot_shares_notes() {
    let snapshot = NotesSnapshot::new(vec![
      ResearchNote::ok("search", "first"),
      ResearchNote::failed("fetch", NoteStatus::ToolFailed, "offline").with_goal(Some("docs".into())),
    ]);
    let copy = snapshot.clone();

    assert_eq!(copy.len(), 2);
    assert_eq!(copy[1].goal.as_deref(), Some("docs"));
    assert_eq!(serde_json::to_value(&copy[0]).unwrap()["status"], "ok");
  }
}
