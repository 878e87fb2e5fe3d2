//! The versioned state record.

use serde::{Deserialize, Serialize};

use crate::context::{ExecutionContext, keys};
use crate::error::{RunError, StateError};
use crate::message::Message;
use crate::notes::{NotesSnapshot, ResearchNote};

/// How complete a successful result is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
  /// Research finished normally.
  Complete,
  /// Research was cut short (iteration cap, failed units) but still produced output.
  Partial,
  /// The run halted to ask the caller a question.
  Clarification,
}

/// Final output of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalOutput {
  pub kind: OutputKind,
  pub content: String,
}

impl FinalOutput {
  pub fn new(kind: OutputKind, content: impl Into<String>) -> Self {
    Self {
      kind,
      content: content.into(),
    }
  }
}

/// State threaded through every phase of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
  run_id: String,
  version: u64,
  input: String,
  current_phase: String,
  history: Vec<Message>,
  context: ExecutionContext,
  #[serde(skip_serializing_if = "Option::is_none")]
  final_output: Option<FinalOutput>,
  #[serde(skip_serializing_if = "Option::is_none")]
  error: Option<RunError>,
}

impl StateRecord {
  /// Create the initial record for a run. The input is recorded as the
  /// first user message.
  pub fn new(run_id: impl Into<String>, input: impl Into<String>, entry: impl Into<String>) -> Self {
    let input = input.into();
    Self {
      run_id: run_id.into(),
      version: 0,
      history: vec![Message::user(input.clone())],
      input,
      current_phase: entry.into(),
      context: ExecutionContext::new(),
      final_output: None,
      error: None,
    }
  }

  pub fn run_id(&self) -> &str {
    &self.run_id
  }

  pub fn version(&self) -> u64 {
    self.version
  }

  pub fn input(&self) -> &str {
    &self.input
  }

  pub fn current_phase(&self) -> &str {
    &self.current_phase
  }

  pub fn history(&self) -> &[Message] {
    &self.history
  }

  pub fn context(&self) -> &ExecutionContext {
    &self.context
  }

  pub fn context_mut(&mut self) -> &mut ExecutionContext {
    &mut self.context
  }

  pub fn final_output(&self) -> Option<&FinalOutput> {
    self.final_output.as_ref()
  }

  pub fn error(&self) -> Option<&RunError> {
    self.error.as_ref()
  }

  /// A sealed record carries a final output or an error and accepts no
  /// further commits.
  pub fn is_sealed(&self) -> bool {
    self.final_output.is_some() || self.error.is_some()
  }

  /// Append a message to the history.
  pub fn push_message(&mut self, message: Message) {
    self.history.push(message);
  }

  /// Decode the accumulated research notes.
  pub fn notes(&self) -> Result<Vec<ResearchNote>, StateError> {
    let key = keys::research_notes();
    self
      .context
      .get_as::<Vec<ResearchNote>>(&key)
      .map(Option::unwrap_or_default)
      .map_err(|source| StateError::Malformed {
        key: key.to_string(),
        source,
      })
  }

  /// Append notes to the research namespace, preserving order.
  pub fn push_notes(
    &mut self,
    notes: impl IntoIterator<Item = ResearchNote>,
  ) -> Result<(), StateError> {
    let mut all = self.notes()?;
    all.extend(notes);
    let key = keys::research_notes();
    self
      .context
      .insert_as(key.clone(), &all)
      .map_err(|source| StateError::Malformed {
        key: key.to_string(),
        source,
      })
  }

  /// Read-only copy of the notes for concurrent units.
  pub fn notes_snapshot(&self) -> Result<NotesSnapshot, StateError> {
    Ok(NotesSnapshot::new(self.notes()?))
  }

  /// Commit a transition to the next phase.
  pub fn advance_to(&mut self, phase: impl Into<String>) -> Result<(), StateError> {
    self.ensure_open()?;
    self.current_phase = phase.into();
    self.version += 1;
    Ok(())
  }

  /// Record the final output. Seals the record.
  pub fn complete(&mut self, output: FinalOutput) -> Result<(), StateError> {
    self.ensure_open()?;
    self.final_output = Some(output);
    self.version += 1;
    Ok(())
  }

  /// Record an unrecoverable error. Seals the record.
  pub fn fail(&mut self, error: RunError) -> Result<(), StateError> {
    self.ensure_open()?;
    self.error = Some(error);
    self.version += 1;
    Ok(())
  }

  fn ensure_open(&self) -> Result<(), StateError> {
    if self.is_sealed() {
      return Err(StateError::Sealed);
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::ErrorKind;
  use crate::message::Role;
  use crate::notes::NoteStatus;

  fn record() -> StateRecord {
    StateRecord::new("run-1", "what is rust?", "clarify")
  }

  #[test]
  fn test_new_records_input_as_user_message() {
    let state = record();
    assert_eq!(state.version(), 0);
    assert_eq!(state.input(), "what is rust?");
    assert_eq!(state.current_phase(), "clarify");
    assert_eq!(state.history().len(), 1);
    assert_eq!(state.history()[0].role, Role::User);
    assert!(!state.is_sealed());
  }

  #[test]
  fn test_advance_bumps_version() {
    let mut state = record();
    state.advance_to("write_brief").unwrap();
    state.advance_to("supervisor").unwrap();

    assert_eq!(state.current_phase(), "supervisor");
    assert_eq!(state.version(), 2);
  }

  #[test]
  fn test_sealed_after_complete() {
    let mut state = record();
    state
      .complete(FinalOutput::new(OutputKind::Complete, "done"))
      .unwrap();

    assert!(state.is_sealed());
    assert!(matches!(state.advance_to("x"), Err(StateError::Sealed)));
    assert!(matches!(
      state.fail(RunError::new(ErrorKind::Gateway, "late")),
      Err(StateError::Sealed)
    ));
    assert!(state.error().is_none());
  }

  #[test]
  fn test_sealed_after_fail() {
    let mut state = record();
    state
      .fail(RunError::new(ErrorKind::Cancelled, "stop"))
      .unwrap();

    assert!(matches!(
      state.complete(FinalOutput::new(OutputKind::Complete, "x")),
      Err(StateError::Sealed)
    ));
    assert!(state.final_output().is_none());
  }

  #[test]
  fn test_push_notes_preserves_order() {
    let mut state = record();
    state
      .push_notes(vec![ResearchNote::ok("search", "first")])
      .unwrap();
    state
      .push_notes(vec![
        ResearchNote::failed("search", NoteStatus::UnitTimedOut, "unit failed: timeout"),
        ResearchNote::ok("search", "third"),
      ])
      .unwrap();

    let notes = state.notes().unwrap();
    let contents: Vec<&str> = notes.iter().map(|n| n.content.as_str()).collect();
    assert_eq!(contents, vec!["first", "unit failed: timeout", "third"]);

    let snapshot = state.notes_snapshot().unwrap();
    assert_eq!(snapshot.len(), 3);
  }

  #[test]
  fn test_malformed_notes() {
    let mut state = record();
    state
      .context_mut()
      .insert(keys::research_notes(), "not a list");

    assert!(matches!(state.notes(), Err(StateError::Malformed { .. })));
  }
}
