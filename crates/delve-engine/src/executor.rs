//! Run executor.
//!
//! The executor drives a graph to completion against one state record.
//! Each dispatch hands the current phase a private working copy; when the
//! phase returns, the copy is checked against the phase contract and either
//! committed as a whole or thrown away.

use std::sync::Arc;

use delve_config::RunLimits;
use delve_graph::{Graph, Phase, PhaseError, Transition};
use delve_state::{ContextKey, ErrorKind, FinalOutput, RunError, StateRecord};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::capabilities::Capabilities;
use crate::dispatch::dispatch;
use crate::events::{NoopNotifier, RunEvent, RunNotifier};
use crate::report::{PhaseTransition, RunReport, RunStatus};

/// The run executor.
///
/// Generic over `N: RunNotifier` so callers pick how events are observed.
/// Use `Executor::new()` to discard events, or `Executor::with_notifier()`.
pub struct Executor<N: RunNotifier = NoopNotifier> {
  capabilities: Capabilities,
  notifier: N,
}

impl Executor<NoopNotifier> {
  pub fn new(capabilities: Capabilities) -> Self {
    Self::with_notifier(capabilities, NoopNotifier)
  }
}

impl<N: RunNotifier> Executor<N> {
  pub fn with_notifier(capabilities: Capabilities, notifier: N) -> Self {
    Self {
      capabilities,
      notifier,
    }
  }

  pub fn capabilities(&self) -> &Capabilities {
    &self.capabilities
  }

  pub fn notifier(&self) -> &N {
    &self.notifier
  }

  /// Prepare a run of `graph` for `input`.
  ///
  /// Returns a [`Run`] handle. Call `.wait()` to drive it to completion.
  pub fn start(
    &self,
    graph: Arc<Graph>,
    input: impl Into<String>,
    limits: RunLimits,
    cancel: CancellationToken,
  ) -> Run<'_, N> {
    let run_id = uuid::Uuid::new_v4().to_string();
    let state = StateRecord::new(run_id, input, graph.entry());

    Run {
      executor: self,
      graph,
      state,
      limits,
      cancel,
    }
  }

  /// Start a run and wait for it.
  pub async fn execute(
    &self,
    graph: Arc<Graph>,
    input: impl Into<String>,
    limits: RunLimits,
    cancel: CancellationToken,
  ) -> RunReport {
    self.start(graph, input, limits, cancel).wait().await
  }
}

/// How the dispatch loop ended.
enum RunEnd {
  Succeeded(FinalOutput),
  Failed(RunError),
  Cancelled(String),
}

/// A prepared run. Nothing happens until [`wait`](Run::wait).
pub struct Run<'a, N: RunNotifier> {
  executor: &'a Executor<N>,
  graph: Arc<Graph>,
  state: StateRecord,
  limits: RunLimits,
  cancel: CancellationToken,
}

impl<'a, N: RunNotifier> Run<'a, N> {
  pub fn run_id(&self) -> &str {
    self.state.run_id()
  }

  /// Place a value in the context before the entry phase runs.
  pub fn seed(mut self, key: ContextKey, value: impl Into<serde_json::Value>) -> Self {
    self.state.context_mut().insert(key, value);
    self
  }

  /// Drive the run to a terminal status.
  #[instrument(
    name = "run_execute",
    skip(self),
    fields(run_id = %self.state.run_id(), graph = %self.graph.name())
  )]
  pub async fn wait(mut self) -> RunReport {
    let run_id = self.state.run_id().to_string();
    let executor = self.executor;
    let notifier = &executor.notifier;
    let mut status = RunStatus::Pending;

    info!(
      run_id = %run_id,
      graph = %self.graph.name(),
      input_len = self.state.input().len(),
      "run_started"
    );
    notifier.notify(RunEvent::RunStarted {
      run_id: run_id.clone(),
      graph: self.graph.name().to_string(),
    });
    advance(&mut status, RunStatus::Running);

    let mut transitions = Vec::new();
    let mut dispatches = 0;
    let end = self.run_loop(&mut transitions, &mut dispatches).await;

    match end {
      RunEnd::Succeeded(output) => {
        info!(run_id = %run_id, kind = ?output.kind, dispatches, "run_succeeded");
        notifier.notify(RunEvent::RunSucceeded {
          run_id: run_id.clone(),
          kind: output.kind,
        });
        self.seal(|state| state.complete(output));
        advance(&mut status, RunStatus::Succeeded);
      }
      RunEnd::Failed(err) => {
        error!(run_id = %run_id, kind = %err.kind, error = %err.message, "run_failed");
        notifier.notify(RunEvent::RunFailed {
          run_id: run_id.clone(),
          error: err.clone(),
        });
        self.seal(|state| state.fail(err));
        advance(&mut status, RunStatus::Failed);
      }
      RunEnd::Cancelled(reason) => {
        warn!(run_id = %run_id, reason = %reason, "run_cancelled");
        notifier.notify(RunEvent::RunCancelled {
          run_id: run_id.clone(),
          reason: reason.clone(),
        });
        self.seal(|state| state.fail(RunError::new(ErrorKind::Cancelled, reason)));
        advance(&mut status, RunStatus::Cancelled);
      }
    }

    RunReport {
      run_id,
      status,
      state: self.state,
      transitions,
      dispatches,
    }
  }

  /// Dispatch phases until one ends the run.
  async fn run_loop(
    &mut self,
    transitions: &mut Vec<PhaseTransition>,
    dispatches: &mut u32,
  ) -> RunEnd {
    if self.limits.max_dispatches == 0 {
      return RunEnd::Failed(RunError::new(
        ErrorKind::Config,
        "max_dispatches must be at least 1",
      ));
    }

    let graph = Arc::clone(&self.graph);
    let executor = self.executor;
    let run_cancel = self.cancel.child_token();
    let deadline = self.limits.run_timeout.map(|t| Instant::now() + t);

    loop {
      if run_cancel.is_cancelled() {
        return RunEnd::Cancelled("run cancelled".to_string());
      }
      if deadline.is_some_and(|d| Instant::now() >= d) {
        return self.timed_out(&run_cancel);
      }

      let name = self.state.current_phase().to_string();
      let Some(phase) = graph.phase(&name) else {
        return RunEnd::Failed(RunError::new(
          ErrorKind::PhaseFailed,
          format!("current phase '{}' is not in graph '{}'", name, graph.name()),
        ));
      };

      if *dispatches >= self.limits.max_dispatches {
        return RunEnd::Failed(RunError::new(
          ErrorKind::IterationLimitExceeded,
          format!(
            "dispatch budget of {} exhausted before phase '{}'",
            self.limits.max_dispatches, name
          ),
        ));
      }
      *dispatches += 1;

      info!(run_id = %self.state.run_id(), phase = %name, dispatch = *dispatches, "phase_started");
      executor.notifier.notify(RunEvent::PhaseStarted {
        run_id: self.state.run_id().to_string(),
        phase: name.clone(),
        dispatch: *dispatches,
      });

      let mut working = self.state.clone();
      let result = tokio::select! {
        biased;
        _ = run_cancel.cancelled() => Err(PhaseError::Cancelled),
        _ = deadline_elapsed(deadline) => {
          return self.timed_out(&run_cancel);
        }
        step = dispatch(
          &graph,
          phase,
          &mut working,
          &executor.capabilities,
          &executor.notifier,
          &run_cancel,
        ) => step,
      };

      let step = match result {
        Ok(step) => step,
        Err(PhaseError::Cancelled) => {
          return RunEnd::Cancelled(format!("run cancelled during phase '{}'", name));
        }
        Err(e) => {
          error!(run_id = %self.state.run_id(), phase = %name, error = %e, "phase_failed");
          return RunEnd::Failed(RunError::new(e.kind(), e.to_string()));
        }
      };

      if let Err(e) = verify_contract(&graph, phase, &self.state, &working, &step.transition) {
        error!(run_id = %self.state.run_id(), phase = %name, error = %e, "phase_contract_violated");
        return RunEnd::Failed(RunError::new(e.kind(), e.to_string()));
      }

      // Commit the working copy
      self.state = working;
      transitions.push(PhaseTransition {
        phase: name.clone(),
        outcome: step.outcome.clone(),
      });
      info!(run_id = %self.state.run_id(), phase = %name, outcome = %step.outcome, "phase_completed");
      executor.notifier.notify(RunEvent::PhaseCompleted {
        run_id: self.state.run_id().to_string(),
        phase: name.clone(),
        outcome: step.outcome,
      });

      match step.transition {
        Transition::ContinueTo(next) => {
          if let Err(e) = self.state.advance_to(next) {
            return RunEnd::Failed(RunError::new(ErrorKind::PhaseFailed, e.to_string()));
          }
        }
        Transition::Succeed(output) => return RunEnd::Succeeded(output),
        Transition::Fail(message) => {
          return RunEnd::Failed(RunError::new(
            ErrorKind::PhaseFailed,
            format!("phase '{}' failed: {}", name, message),
          ));
        }
      }
    }
  }

  fn timed_out(&self, run_cancel: &CancellationToken) -> RunEnd {
    run_cancel.cancel();
    let after = self.limits.run_timeout.unwrap_or_default();
    RunEnd::Cancelled(format!("run timed out after {}ms", after.as_millis()))
  }

  /// Write the terminal result into the state record.
  fn seal(&mut self, f: impl FnOnce(&mut StateRecord) -> Result<(), delve_state::StateError>) {
    if let Err(e) = f(&mut self.state) {
      error!(run_id = %self.state.run_id(), error = %e, "state_seal_failed");
    }
  }
}

fn advance(status: &mut RunStatus, next: RunStatus) {
  if status.can_transition_to(next) {
    *status = next;
  } else {
    warn!(from = ?status, to = ?next, "illegal run status transition ignored");
  }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
  match deadline {
    Some(deadline) => tokio::time::sleep_until(deadline).await,
    None => std::future::pending().await,
  }
}

/// Check a phase's working copy before it is committed.
fn verify_contract(
  graph: &Graph,
  phase: &Phase,
  before: &StateRecord,
  after: &StateRecord,
  transition: &Transition,
) -> Result<(), PhaseError> {
  let name = phase.name.as_str();

  if after.run_id() != before.run_id() || after.input() != before.input() {
    return Err(PhaseError::contract(name, "run identity or input changed"));
  }
  if after.version() != before.version() || after.current_phase() != before.current_phase() {
    return Err(PhaseError::contract(name, "phases cannot commit or move the run"));
  }
  if after.final_output().is_some() || after.error().is_some() {
    return Err(PhaseError::contract(
      name,
      "phases cannot set the final output or error directly",
    ));
  }

  let kept = before.history().len();
  if after.history().len() < kept || after.history()[..kept] != *before.history() {
    return Err(PhaseError::contract(name, "history is append-only"));
  }

  if let Some(key) = before
    .context()
    .changed_keys(after.context())
    .into_iter()
    .find(|key| !phase.may_write(key))
  {
    return Err(PhaseError::contract(
      name,
      format!("wrote undeclared context key '{}'", key),
    ));
  }

  match transition {
    Transition::ContinueTo(next) if !graph.is_successor(name, next) => Err(PhaseError::contract(
      name,
      format!("'{}' is not a declared successor", next),
    )),
    Transition::Succeed(_) if !graph.is_terminal(name) => Err(PhaseError::contract(
      name,
      "only terminal phases can produce a final output",
    )),
    _ => Ok(()),
  }
}
