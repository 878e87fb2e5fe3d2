//! Bounded concurrent execution of spawnable units.
//!
//! A batch is a list of units submitted together. At most
//! `max_concurrent_units` run at once; the rest wait in submission order for
//! a slot. Each unit gets a read-only snapshot of the research notes, never
//! the state record. Results come back in submission order no matter which
//! unit finished first.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use delve_capability::{ToolCall, ToolContext, ToolError, ToolRegistry};
use delve_config::PoolConfig;
use delve_graph::PhaseError;
use delve_state::{Message, NoteStatus, NotesSnapshot, ResearchNote};
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::events::{RunEvent, RunNotifier};

/// One unit of work for the pool.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitSpec {
  /// Position of the originating call within its proposal.
  pub index: usize,
  pub call_id: String,
  pub tool: String,
  pub args: serde_json::Value,
  /// Sub-goal handed to the tool.
  pub goal: Option<String>,
}

impl UnitSpec {
  pub fn from_call(index: usize, call: &ToolCall) -> Self {
    Self {
      index,
      call_id: call.id.clone(),
      tool: call.name.clone(),
      args: call.arguments.clone(),
      goal: call.goal(),
    }
  }
}

/// Terminal result of a unit. Units are never retried.
#[derive(Debug, Clone)]
pub enum UnitOutcome {
  Completed(serde_json::Value),
  Failed(ToolError),
  TimedOut(Duration),
  Cancelled,
}

impl UnitOutcome {
  pub fn status(&self) -> &'static str {
    match self {
      UnitOutcome::Completed(_) => "completed",
      UnitOutcome::Failed(_) => "failed",
      UnitOutcome::TimedOut(_) => "timed_out",
      UnitOutcome::Cancelled => "cancelled",
    }
  }

  pub fn is_completed(&self) -> bool {
    matches!(self, UnitOutcome::Completed(_))
  }
}

/// A unit together with its outcome.
#[derive(Debug, Clone)]
pub struct UnitReport {
  pub index: usize,
  pub call_id: String,
  pub tool: String,
  pub goal: Option<String>,
  pub outcome: UnitOutcome,
}

impl UnitReport {
  /// Research note recording this unit.
  pub fn note(&self) -> ResearchNote {
    let note = match &self.outcome {
      UnitOutcome::Completed(output) => ResearchNote::ok(&self.tool, render_output(output)),
      UnitOutcome::Failed(e) => {
        ResearchNote::failed(&self.tool, NoteStatus::UnitFailed, format!("unit failed: {}", e))
      }
      UnitOutcome::TimedOut(after) => ResearchNote::failed(
        &self.tool,
        NoteStatus::UnitTimedOut,
        format!("unit failed: timeout after {}ms", after.as_millis()),
      ),
      UnitOutcome::Cancelled => {
        ResearchNote::failed(&self.tool, NoteStatus::UnitFailed, "unit failed: cancelled")
      }
    };
    note.with_goal(self.goal.clone())
  }

  /// Tool message answering the originating call.
  pub fn message(&self) -> Message {
    match &self.outcome {
      UnitOutcome::Completed(output) => Message::tool_result(&self.call_id, render_output(output)),
      _ => Message::tool_failure(&self.call_id, self.note().content),
    }
  }
}

/// Results of a batch, in submission order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
  pub units: Vec<UnitReport>,
  /// Highest number of units observed running at the same time.
  pub peak_in_flight: usize,
}

impl BatchReport {
  pub fn completed(&self) -> usize {
    self.units.iter().filter(|u| u.outcome.is_completed()).count()
  }

  pub fn failed(&self) -> usize {
    self.units.len() - self.completed()
  }
}

/// Everything a batch needs from the calling phase.
#[derive(Clone, Copy)]
pub struct BatchContext<'a> {
  pub run_id: &'a str,
  pub phase: &'a str,
  pub tools: &'a Arc<ToolRegistry>,
  pub notes: &'a NotesSnapshot,
  pub notifier: &'a dyn RunNotifier,
  pub cancel: &'a CancellationToken,
}

/// Runs batches of units under a concurrency ceiling.
#[derive(Debug, Clone)]
pub struct SubtaskPool {
  config: PoolConfig,
}

impl SubtaskPool {
  pub fn new(config: PoolConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &PoolConfig {
    &self.config
  }

  /// Run a batch to completion.
  ///
  /// Per-unit failures and timeouts are reported in the batch. Cancellation
  /// stops dispatching, aborts running units and returns
  /// [`PhaseError::Cancelled`].
  #[instrument(
    name = "pool_batch",
    skip(self, units, ctx),
    fields(run_id = %ctx.run_id, phase = %ctx.phase, units = units.len())
  )]
  pub async fn run_batch(
    &self,
    units: Vec<UnitSpec>,
    ctx: BatchContext<'_>,
  ) -> Result<BatchReport, PhaseError> {
    let total = units.len();
    let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_units.max(1)));
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut pending: VecDeque<(usize, UnitSpec)> = units.into_iter().enumerate().collect();
    let mut slots: Vec<Option<UnitReport>> = vec![None; total];
    let mut in_flight = JoinSet::new();

    loop {
      tokio::select! {
        biased;

        _ = ctx.cancel.cancelled() => {
          warn!(
            run_id = %ctx.run_id,
            phase = %ctx.phase,
            running = in_flight.len(),
            queued = pending.len(),
            "batch_cancelled"
          );
          in_flight.abort_all();
          return Err(PhaseError::Cancelled);
        }

        Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
          let (position, report): (usize, UnitReport) = joined.map_err(|e| {
            PhaseError::failed(ctx.phase, format!("unit join error: {}", e))
          })?;

          debug!(
            run_id = %ctx.run_id,
            call_id = %report.call_id,
            status = report.outcome.status(),
            "unit_completed"
          );
          ctx.notifier.notify(RunEvent::UnitCompleted {
            run_id: ctx.run_id.to_string(),
            phase: ctx.phase.to_string(),
            index: report.index,
            call_id: report.call_id.clone(),
            status: report.outcome.status().to_string(),
          });
          slots[position] = Some(report);
        }

        permit = semaphore.clone().acquire_owned(), if !pending.is_empty() => {
          let permit = permit.map_err(|_| PhaseError::failed(ctx.phase, "pool semaphore closed"))?;
          let Some((position, unit)) = pending.pop_front() else {
            continue;
          };

          ctx.notifier.notify(RunEvent::UnitSpawned {
            run_id: ctx.run_id.to_string(),
            phase: ctx.phase.to_string(),
            index: unit.index,
            call_id: unit.call_id.clone(),
            tool: unit.tool.clone(),
          });

          let tools = Arc::clone(ctx.tools);
          let tool_ctx = ToolContext {
            run_id: ctx.run_id.to_string(),
            call_id: unit.call_id.clone(),
            goal: unit.goal.clone(),
            notes: ctx.notes.clone(),
          };
          let timeout = self.config.unit_timeout;
          let active = Arc::clone(&active);
          let peak = Arc::clone(&peak);

          in_flight.spawn(async move {
            let running = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(running, Ordering::SeqCst);

            let outcome = execute_unit(&tools, &unit, tool_ctx, timeout).await;

            active.fetch_sub(1, Ordering::SeqCst);
            drop(permit);

            let report = UnitReport {
              index: unit.index,
              call_id: unit.call_id,
              tool: unit.tool,
              goal: unit.goal,
              outcome,
            };
            (position, report)
          });
        }

        else => break,
      }
    }

    Ok(BatchReport {
      units: slots.into_iter().flatten().collect(),
      peak_in_flight: peak.load(Ordering::SeqCst),
    })
  }
}

/// Invoke one unit's tool under the unit timeout.
#[instrument(
  name = "unit_execute",
  skip(tools, unit, ctx),
  fields(run_id = %ctx.run_id, call_id = %unit.call_id, tool = %unit.tool)
)]
async fn execute_unit(
  tools: &ToolRegistry,
  unit: &UnitSpec,
  ctx: ToolContext,
  timeout: Option<Duration>,
) -> UnitOutcome {
  match invoke_guarded(tools, &unit.tool, unit.args.clone(), ctx, timeout).await {
    Ok(output) => UnitOutcome::Completed(output),
    Err(ToolError::TimedOut { after_ms, .. }) => {
      warn!(call_id = %unit.call_id, timeout_ms = after_ms, "unit_timed_out");
      UnitOutcome::TimedOut(Duration::from_millis(after_ms))
    }
    Err(e) => {
      debug!(call_id = %unit.call_id, error = %e, "unit_failed");
      UnitOutcome::Failed(e)
    }
  }
}

/// Invoke a tool with a panic reported as [`ToolError::Failed`] and an
/// elapsed `timeout` as [`ToolError::TimedOut`].
pub(crate) async fn invoke_guarded(
  tools: &ToolRegistry,
  tool: &str,
  args: serde_json::Value,
  ctx: ToolContext,
  timeout: Option<Duration>,
) -> Result<serde_json::Value, ToolError> {
  let call = AssertUnwindSafe(tools.invoke(tool, args, ctx)).catch_unwind();

  let caught = match timeout {
    Some(limit) => match tokio::time::timeout(limit, call).await {
      Ok(caught) => caught,
      Err(_) => {
        return Err(ToolError::TimedOut {
          tool: tool.to_string(),
          after_ms: limit.as_millis() as u64,
        });
      }
    },
    None => call.await,
  };

  caught.unwrap_or_else(|payload| {
    let message = panic_message(payload.as_ref());
    warn!(tool = %tool, panic = %message, "tool_panicked");
    Err(ToolError::failed(tool, format!("panicked: {}", message)))
  })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    message.to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "unknown panic".to_string()
  }
}

/// Text form of a tool output as it appears in history and notes.
pub(crate) fn render_output(output: &serde_json::Value) -> String {
  match output {
    serde_json::Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}
