//! The reason-act tool loop.
//!
//! Each cycle asks the gateway for the next action and carries it out:
//! tool calls run (spawnable ones through the sub-task pool) and their
//! results are appended to history and to the research notes; a stop or a
//! clarification request ends the loop. The loop never runs more than
//! `max_iterations` cycles; reaching the cap is a forced stop, not a failure.

use delve_capability::{
  Action, ProposeRequest, ToolCall, ToolContext, ToolDescriptor, propose_within,
};
use delve_graph::{PhaseError, ToolLoopSpec, outcome};
use delve_state::{Message, NoteStatus, ResearchNote, StateRecord, keys};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::capabilities::Capabilities;
use crate::events::RunNotifier;
use crate::pool::{BatchContext, SubtaskPool, UnitSpec, invoke_guarded, render_output};

/// Drives one tool-loop phase against a working copy of the state record.
pub struct ToolLoopController<'a> {
  phase: &'a str,
  spec: &'a ToolLoopSpec,
  capabilities: &'a Capabilities,
  notifier: &'a dyn RunNotifier,
  cancel: &'a CancellationToken,
}

impl<'a> ToolLoopController<'a> {
  pub fn new(
    phase: &'a str,
    spec: &'a ToolLoopSpec,
    capabilities: &'a Capabilities,
    notifier: &'a dyn RunNotifier,
    cancel: &'a CancellationToken,
  ) -> Self {
    Self {
      phase,
      spec,
      capabilities,
      notifier,
      cancel,
    }
  }

  /// Run the loop to completion and return its outcome (`stop` or `clarify`).
  #[instrument(
    name = "tool_loop",
    skip(self, state),
    fields(run_id = %state.run_id(), phase = %self.phase, max_iterations = self.spec.max_iterations)
  )]
  pub async fn run(&self, state: &mut StateRecord) -> Result<String, PhaseError> {
    let tools = self.capabilities.tools.descriptors();
    let mut iteration = 0;
    let mut forced_stop = false;

    let result = loop {
      if iteration >= self.spec.max_iterations {
        warn!(
          run_id = %state.run_id(),
          phase = %self.phase,
          iterations = iteration,
          "tool_loop_forced_stop"
        );
        forced_stop = true;
        state.push_message(Message::system(format!(
          "Research stopped after reaching the limit of {} iterations.",
          self.spec.max_iterations
        )));
        state
          .context_mut()
          .insert(keys::supervisor_stop_reason(), "iteration limit reached");
        break outcome::STOP;
      }
      if self.cancel.is_cancelled() {
        return Err(PhaseError::Cancelled);
      }

      iteration += 1;
      let action = self.propose(state, iteration, &tools).await?;

      match action {
        Action::Stop { reason } => {
          info!(run_id = %state.run_id(), iteration, "tool_loop_stopped");
          let reason = reason.unwrap_or_else(|| "research complete".to_string());
          state.context_mut().insert(keys::supervisor_stop_reason(), reason);
          break outcome::STOP;
        }
        Action::ToolCalls { calls } if calls.is_empty() => {
          debug!(run_id = %state.run_id(), iteration, "empty proposal treated as stop");
          state
            .context_mut()
            .insert(keys::supervisor_stop_reason(), "no further tool calls proposed");
          break outcome::STOP;
        }
        Action::Clarify { question } if self.spec.allow_clarification => {
          info!(run_id = %state.run_id(), iteration, "tool_loop_clarification");
          state.context_mut().insert(keys::clarify_question(), question);
          state
            .context_mut()
            .insert(keys::supervisor_stop_reason(), "clarification requested");
          break outcome::CLARIFY;
        }
        Action::Clarify { question } => {
          warn!(run_id = %state.run_id(), iteration, "clarification_rejected");
          state.push_message(Message::system(
            "Clarification is not available at this stage. Continue the research with the information at hand.",
          ));
          state.push_notes([ResearchNote::failed(
            self.phase,
            NoteStatus::Rejected,
            format!("clarification rejected: {}", question),
          )])?;
        }
        Action::ToolCalls { calls } => {
          state.push_message(Message::assistant_calls(calls.clone()));
          self.run_calls(state, &calls).await?;
        }
      }
    };

    let context = state.context_mut();
    context.insert(keys::supervisor_iterations(), iteration);
    context.insert(keys::supervisor_forced_stop(), forced_stop);

    Ok(result.to_string())
  }

  /// Ask the gateway for the next action, racing cancellation and the
  /// proposal timeout.
  async fn propose(
    &self,
    state: &StateRecord,
    iteration: u32,
    tools: &[ToolDescriptor],
  ) -> Result<Action, PhaseError> {
    let request = ProposeRequest {
      run_id: state.run_id(),
      phase: self.phase,
      iteration,
      history: state.history(),
      tools,
      context: state.context(),
    };

    tokio::select! {
      biased;
      _ = self.cancel.cancelled() => Err(PhaseError::Cancelled),
      action = propose_within(
        self.capabilities.gateway.as_ref(),
        request,
        self.spec.propose_timeout,
      ) => Ok(action?),
    }
  }

  /// Execute one proposal's calls and fold the results into the state.
  ///
  /// Non-spawnable calls run one at a time in proposal order under the unit
  /// timeout; spawnable calls go to the pool as a single batch. Results land in history in
  /// proposal order either way.
  async fn run_calls(&self, state: &mut StateRecord, calls: &[ToolCall]) -> Result<(), PhaseError> {
    let notes = state.notes_snapshot()?;
    let mut results: Vec<Option<(Message, ResearchNote)>> = vec![None; calls.len()];
    let mut units = Vec::new();

    for (index, call) in calls.iter().enumerate() {
      if self.spec.is_spawnable(&call.name) {
        units.push(UnitSpec::from_call(index, call));
        continue;
      }
      if self.cancel.is_cancelled() {
        return Err(PhaseError::Cancelled);
      }

      let ctx = ToolContext {
        run_id: state.run_id().to_string(),
        call_id: call.id.clone(),
        goal: call.goal(),
        notes: notes.clone(),
      };
      let invocation = invoke_guarded(
        &self.capabilities.tools,
        &call.name,
        call.arguments.clone(),
        ctx,
        self.spec.pool.unit_timeout,
      );
      let result = tokio::select! {
        biased;
        _ = self.cancel.cancelled() => return Err(PhaseError::Cancelled),
        result = invocation => result,
      };

      let goal = call.goal();
      results[index] = Some(match result {
        Ok(output) => {
          let content = render_output(&output);
          (
            Message::tool_result(&call.id, content.clone()),
            ResearchNote::ok(&call.name, content).with_goal(goal),
          )
        }
        Err(e) => {
          warn!(run_id = %state.run_id(), tool = %call.name, error = %e, "tool_failed");
          (
            Message::tool_failure(&call.id, e.to_string()),
            ResearchNote::failed(&call.name, NoteStatus::ToolFailed, e.to_string()).with_goal(goal),
          )
        }
      });
    }

    if !units.is_empty() {
      let pool = SubtaskPool::new(self.spec.pool);
      let report = pool
        .run_batch(
          units,
          BatchContext {
            run_id: state.run_id(),
            phase: self.phase,
            tools: &self.capabilities.tools,
            notes: &notes,
            notifier: self.notifier,
            cancel: self.cancel,
          },
        )
        .await?;

      for unit in &report.units {
        results[unit.index] = Some((unit.message(), unit.note()));
      }
    }

    let mut new_notes = Vec::with_capacity(calls.len());
    for (message, note) in results.into_iter().flatten() {
      state.push_message(message);
      new_notes.push(note);
    }
    state.push_notes(new_notes)?;

    Ok(())
  }
}
