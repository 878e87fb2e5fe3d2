//! Delve State
//!
//! The [`StateRecord`] is the single data structure threaded through every
//! phase of a run. It carries:
//!
//! - the conversation history (append-only within a run)
//! - the current phase name
//! - a namespaced [`ExecutionContext`] used for phase-to-phase handoff
//! - the immutable user input
//! - exactly one of final output or error once the run is over
//!
//! The record has one writer at a time. Phases receive a working copy and
//! hand it back; the executor validates and commits it, bumping the version.
//! Concurrent sub-task units never see the record itself, only a read-only
//! [`NotesSnapshot`].

mod context;
mod error;
mod message;
mod notes;
mod record;

pub use context::{ContextKey, ExecutionContext, InvalidContextKey, keys};
pub use error::{ErrorKind, RunError, StateError};
pub use message::{Message, Role, ToolCall};
pub use notes::{NoteStatus, NotesSnapshot, ResearchNote};
pub use record::{FinalOutput, OutputKind, StateRecord};
