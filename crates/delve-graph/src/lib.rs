//! Delve Graph
//!
//! This crate provides the validated phase graph for delve. A graph is a
//! named, immutable set of phases plus their adjacency, a declared entry and
//! declared terminal phases. It is built once and shared read-only between
//! concurrent runs.
//!
//! Building a graph checks everything the executor relies on at run time:
//! - every edge and branch points at a known phase
//! - transforms and fan-outs have exactly one successor
//! - decide and tool-loop phases map every declared outcome, and nothing else
//! - every context key a phase reads is written by some phase or seeded
//! - tool-loop and fan-out limits are non-zero
//!
//! A graph that fails any check is never constructed.
//!
//! ```ignore
//! let graph = GraphBuilder::new("pipeline")
//!   .entry("prepare")
//!   .phase(Phase::transform_fn("prepare", |_state| Ok(TransformOutcome::Next)))
//!   .phase(Phase::transform_fn("finish", |_state| {
//!     Ok(TransformOutcome::Succeed(FinalOutput::new(OutputKind::Complete, "done")))
//!   }))
//!   .edge("prepare", "finish")
//!   .terminal("finish")
//!   .build()?;
//! ```

mod error;
mod graph;
mod phase;
mod transition;

pub use error::{ConfigError, PhaseError};
pub use graph::{Edge, Graph, GraphBuilder, PhaseSummary, SuccessorSummary};
pub use phase::{
  Decide, DecideFn, FanOutSpec, Phase, PhaseKind, ToolLoopSpec, Transform, TransformFn,
  TransformOutcome, outcome,
};
pub use transition::Transition;
