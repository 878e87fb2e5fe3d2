//! Phase dispatch: run one phase against a working copy and resolve the
//! transition it asks for.

use delve_capability::ToolCall;
use delve_graph::{
  FanOutSpec, Graph, Phase, PhaseError, PhaseKind, Transition, TransformOutcome,
};
use delve_state::StateRecord;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::capabilities::Capabilities;
use crate::events::RunNotifier;
use crate::pool::{BatchContext, SubtaskPool, UnitSpec};
use crate::supervisor::ToolLoopController;

/// Result of one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Step {
  /// Outcome label recorded in the run's transition list.
  pub outcome: String,
  pub transition: Transition,
}

impl Step {
  fn new(outcome: impl Into<String>, transition: Transition) -> Self {
    Self {
      outcome: outcome.into(),
      transition,
    }
  }
}

/// Run `phase` against `working` and work out where the run goes next.
#[instrument(
  name = "phase_execute",
  skip_all,
  fields(run_id = %working.run_id(), phase = %phase.name, kind = phase.kind.name())
)]
pub(crate) async fn dispatch(
  graph: &Graph,
  phase: &Phase,
  working: &mut StateRecord,
  capabilities: &Capabilities,
  notifier: &dyn RunNotifier,
  cancel: &CancellationToken,
) -> Result<Step, PhaseError> {
  let name = phase.name.as_str();

  match &phase.kind {
    PhaseKind::Transform(transform) => match transform.apply(working, cancel).await? {
      TransformOutcome::Next => {
        let next = graph.successor(name).ok_or_else(|| {
          PhaseError::contract(name, "terminal phase cannot continue to a successor")
        })?;
        Ok(Step::new("next", Transition::ContinueTo(next.to_string())))
      }
      TransformOutcome::Succeed(output) => Ok(Step::new("succeed", Transition::Succeed(output))),
      TransformOutcome::Fail(message) => Ok(Step::new("fail", Transition::Fail(message))),
    },
    PhaseKind::Decide { decider, .. } => {
      let outcome = decider.decide(working, cancel).await?;
      branch(graph, name, outcome)
    }
    PhaseKind::ToolLoop(spec) => {
      let controller = ToolLoopController::new(name, spec, capabilities, notifier, cancel);
      let outcome = controller.run(working).await?;
      branch(graph, name, outcome)
    }
    PhaseKind::FanOut(spec) => {
      fan_out(name, spec, working, capabilities, notifier, cancel).await?;
      let next = graph
        .successor(name)
        .ok_or_else(|| PhaseError::contract(name, "fan-out phase has no successor"))?;
      Ok(Step::new("next", Transition::ContinueTo(next.to_string())))
    }
  }
}

fn branch(graph: &Graph, phase: &str, outcome: String) -> Result<Step, PhaseError> {
  let next = graph.branch(phase, &outcome).ok_or_else(|| {
    PhaseError::contract(phase, format!("produced undeclared outcome '{}'", outcome))
  })?;
  debug!(phase, outcome = %outcome, next, "branch_taken");
  let next = next.to_string();
  Ok(Step::new(outcome, Transition::ContinueTo(next)))
}

/// Run the fan-out tool once per element of the source array.
async fn fan_out(
  phase: &str,
  spec: &FanOutSpec,
  working: &mut StateRecord,
  capabilities: &Capabilities,
  notifier: &dyn RunNotifier,
  cancel: &CancellationToken,
) -> Result<(), PhaseError> {
  let items = working
    .context()
    .get(&spec.source)
    .ok_or_else(|| PhaseError::failed(phase, format!("'{}' is not set", spec.source)))?
    .as_array()
    .ok_or_else(|| PhaseError::failed(phase, format!("'{}' is not an array", spec.source)))?;

  let units: Vec<UnitSpec> = items
    .iter()
    .enumerate()
    .map(|(index, args)| {
      let call = ToolCall::new(format!("{}-{}", phase, index), &spec.tool, args.clone());
      UnitSpec::from_call(index, &call)
    })
    .collect();

  let notes = working.notes_snapshot()?;
  let report = SubtaskPool::new(spec.pool)
    .run_batch(
      units,
      BatchContext {
        run_id: working.run_id(),
        phase,
        tools: &capabilities.tools,
        notes: &notes,
        notifier,
        cancel,
      },
    )
    .await?;

  let notes: Vec<_> = report.units.iter().map(|unit| unit.note()).collect();
  working.push_notes(notes)?;
  Ok(())
}
