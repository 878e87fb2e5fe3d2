//! Delve Engine
//!
//! This crate drives phase graphs to completion. It owns the run state
//! machine, the reason-act tool loop and the bounded sub-task pool, and ships
//! the research graph built on top of them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Executor                            │
//! │  - start(graph, input, limits, cancel) → Run                │
//! │  - Run::wait() → RunReport                                  │
//! │  - dispatch budget, run timeout, cancellation               │
//! │  - validates and commits each phase's working copy          │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ToolLoopController                       │
//! │  - propose → act → observe, at most max_iterations cycles   │
//! │  - serial tools in proposal order                           │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       SubtaskPool                           │
//! │  - spawnable calls, at most max_concurrent_units in flight  │
//! │  - per-unit timeout, results in submission order            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use delve_engine::{Executor, ResearchGraph};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = RunConfig::default();
//! let graph = Arc::new(ResearchGraph::build(&config, gateway.clone())?);
//! let executor = Executor::new(ResearchGraph::capabilities(gateway, tools));
//!
//! let report = executor
//!   .start(graph, "How does tokio schedule tasks?", config.limits(), CancellationToken::new())
//!   .wait()
//!   .await;
//! let output = report.into_result()?;
//! ```

mod capabilities;
mod dispatch;
mod events;
mod executor;
mod pool;
mod report;
pub mod research;
mod supervisor;

pub use capabilities::Capabilities;
pub use events::{BroadcastNotifier, ChannelNotifier, NoopNotifier, RunEvent, RunNotifier};
pub use executor::{Executor, Run};
pub use pool::{BatchContext, BatchReport, SubtaskPool, UnitOutcome, UnitReport, UnitSpec};
pub use report::{PhaseTransition, RunReport, RunStatus};
pub use research::{ResearchGraph, ThinkTool};
pub use supervisor::ToolLoopController;
