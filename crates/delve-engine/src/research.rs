//! The research graph.
//!
//! ```text
//! clarify --proceed--> write_brief --> supervisor --stop--> synthesize
//!    |                                     |
//!    +--clarify--> await_clarification <---+ (clarify, when allowed)
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use delve_capability::{
  Action, Gateway, ProposeRequest, Tool, ToolContext, ToolDescriptor, ToolError, ToolRegistry,
  propose_within,
};
use delve_config::RunConfig;
use delve_graph::{
  ConfigError, Decide, Graph, GraphBuilder, Phase, PhaseError, ToolLoopSpec, TransformOutcome,
  outcome,
};
use delve_state::{FinalOutput, Message, OutputKind, StateRecord, keys};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::capabilities::Capabilities;

pub const GRAPH_NAME: &str = "research";

pub const CLARIFY: &str = "clarify";
pub const AWAIT_CLARIFICATION: &str = "await_clarification";
pub const WRITE_BRIEF: &str = "write_brief";
pub const SUPERVISOR: &str = "supervisor";
pub const SYNTHESIZE: &str = "synthesize";

/// Outcomes of the clarify phase.
pub const PROCEED: &str = "proceed";

/// Builder for the research graph.
pub struct ResearchGraph;

impl ResearchGraph {
  pub fn build(config: &RunConfig, gateway: Arc<dyn Gateway>) -> Result<Graph, ConfigError> {
    let supervisor = ToolLoopSpec::new(config.max_iterations, config.pool())
      .allow_clarification(config.allow_clarification)
      .spawnable(config.spawnable_tools.iter().cloned())
      .propose_timeout(config.gateway_timeout());

    let clarify = ClarifyDecider {
      gateway: config.allow_clarification.then_some(gateway),
      timeout: config.gateway_timeout(),
    };

    let mut builder = GraphBuilder::new(GRAPH_NAME)
      .entry(CLARIFY)
      .phase(
        Phase::decide(CLARIFY, [PROCEED, outcome::CLARIFY], clarify)
          .writes(keys::clarify_decision())
          .writes(keys::clarify_question()),
      )
      .phase(Phase::transform_fn(AWAIT_CLARIFICATION, await_clarification).reads(keys::clarify_question()))
      .phase(Phase::transform_fn(WRITE_BRIEF, write_brief).writes(keys::research_brief()))
      .phase(Phase::tool_loop(SUPERVISOR, supervisor).reads(keys::research_brief()))
      .phase(
        Phase::transform_fn(SYNTHESIZE, synthesize)
          .reads(keys::research_brief())
          .reads(keys::research_notes())
          .reads(keys::supervisor_forced_stop()),
      )
      .branch(CLARIFY, PROCEED, WRITE_BRIEF)
      .branch(CLARIFY, outcome::CLARIFY, AWAIT_CLARIFICATION)
      .edge(WRITE_BRIEF, SUPERVISOR)
      .branch(SUPERVISOR, outcome::STOP, SYNTHESIZE)
      .terminal(AWAIT_CLARIFICATION)
      .terminal(SYNTHESIZE);

    if config.allow_clarification {
      builder = builder.branch(SUPERVISOR, outcome::CLARIFY, AWAIT_CLARIFICATION);
    }

    builder.build()
  }

  /// Capabilities for the research graph: the given tools plus the built-in
  /// `think` tool, unless one is already registered.
  pub fn capabilities(gateway: Arc<dyn Gateway>, mut tools: ToolRegistry) -> Capabilities {
    if !tools.contains(ThinkTool::NAME) {
      tools.register(ThinkTool);
    }
    Capabilities::new(gateway, tools)
  }
}

/// Decides whether the request needs clarification before research starts.
///
/// Without a gateway the phase is a pass-through.
struct ClarifyDecider {
  gateway: Option<Arc<dyn Gateway>>,
  timeout: Option<Duration>,
}

#[async_trait]
impl Decide for ClarifyDecider {
  async fn decide(
    &self,
    state: &mut StateRecord,
    cancel: &CancellationToken,
  ) -> Result<String, PhaseError> {
    let Some(gateway) = &self.gateway else {
      state.context_mut().insert(keys::clarify_decision(), PROCEED);
      return Ok(PROCEED.to_string());
    };

    let request = ProposeRequest {
      run_id: state.run_id(),
      phase: CLARIFY,
      iteration: 1,
      history: state.history(),
      tools: &[],
      context: state.context(),
    };
    let action = tokio::select! {
      biased;
      _ = cancel.cancelled() => return Err(PhaseError::Cancelled),
      action = propose_within(gateway.as_ref(), request, self.timeout) => action?,
    };

    let decision = match action {
      Action::Clarify { question } => {
        debug!(run_id = %state.run_id(), "clarification_needed");
        state.push_message(Message::assistant(question.clone()));
        state.context_mut().insert(keys::clarify_question(), question);
        outcome::CLARIFY
      }
      _ => PROCEED,
    };
    state.context_mut().insert(keys::clarify_decision(), decision);
    Ok(decision.to_string())
  }
}

fn await_clarification(state: &mut StateRecord) -> Result<TransformOutcome, PhaseError> {
  match state.context().get_str(&keys::clarify_question()) {
    Some(question) => Ok(TransformOutcome::Succeed(FinalOutput::new(
      OutputKind::Clarification,
      question,
    ))),
    None => Ok(TransformOutcome::Fail(
      "no clarification question was recorded".to_string(),
    )),
  }
}

fn write_brief(state: &mut StateRecord) -> Result<TransformOutcome, PhaseError> {
  let brief = format!("Research brief: {}", state.input().trim());
  state.push_message(Message::system(brief.clone()));
  state.context_mut().insert(keys::research_brief(), brief);
  Ok(TransformOutcome::Next)
}

fn synthesize(state: &mut StateRecord) -> Result<TransformOutcome, PhaseError> {
  let brief = state
    .context()
    .get_str(&keys::research_brief())
    .unwrap_or_default()
    .to_string();
  let forced_stop = state
    .context()
    .get(&keys::supervisor_forced_stop())
    .and_then(|v| v.as_bool())
    .unwrap_or(false);
  let notes = state.notes()?;

  let mut report = format!("# Research report\n\n{}\n", brief);

  let findings: Vec<_> = notes.iter().filter(|n| !n.status.is_failure()).collect();
  let gaps: Vec<_> = notes.iter().filter(|n| n.status.is_failure()).collect();

  report.push_str("\n## Findings\n");
  if findings.is_empty() {
    report.push_str("\nNo findings were gathered.\n");
  }
  for note in &findings {
    match &note.goal {
      Some(goal) => report.push_str(&format!("\n- [{}] {}: {}", note.source, goal, note.content)),
      None => report.push_str(&format!("\n- [{}] {}", note.source, note.content)),
    }
  }

  if !gaps.is_empty() || forced_stop {
    report.push_str("\n\n## Gaps\n");
    for note in &gaps {
      report.push_str(&format!("\n- [{}] {}", note.source, note.content));
    }
    if forced_stop {
      report.push_str("\n- research stopped at the iteration limit");
    }
  }
  report.push('\n');

  let kind = if forced_stop || !gaps.is_empty() {
    OutputKind::Partial
  } else {
    OutputKind::Complete
  };
  Ok(TransformOutcome::Succeed(FinalOutput::new(kind, report)))
}

/// Built-in reflection tool. Lets the gateway record its reasoning between
/// research steps without side effects.
pub struct ThinkTool;

impl ThinkTool {
  pub const NAME: &'static str = "think";
}

#[async_trait]
impl Tool for ThinkTool {
  fn descriptor(&self) -> ToolDescriptor {
    ToolDescriptor::new(
      Self::NAME,
      "Reflect on research progress: what was found, what is missing, what to do next.",
    )
    .with_parameters(json!({
      "type": "object",
      "properties": { "reflection": { "type": "string" } },
      "required": ["reflection"]
    }))
  }

  async fn invoke(
    &self,
    args: serde_json::Value,
    _ctx: ToolContext,
  ) -> Result<serde_json::Value, ToolError> {
    let reflection = args
      .get("reflection")
      .and_then(|v| v.as_str())
      .ok_or_else(|| ToolError::InvalidArguments {
        tool: Self::NAME.to_string(),
        message: "missing string field 'reflection'".to_string(),
      })?;
    Ok(json!(format!("Reflection recorded: {}", reflection)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use delve_capability::replay::ScriptedGateway;

  #[test]
  fn test_graph_shape_follows_clarification() {
    let gateway: Arc<dyn Gateway> = Arc::new(ScriptedGateway::new([]));

    let graph = ResearchGraph::build(&RunConfig::default(), gateway.clone()).unwrap();
    assert_eq!(graph.entry(), CLARIFY);
    assert_eq!(graph.successors(SUPERVISOR), vec![SYNTHESIZE]);
    assert!(graph.is_terminal(SYNTHESIZE));
    assert!(graph.is_terminal(AWAIT_CLARIFICATION));

    let config = RunConfig {
      allow_clarification: true,
      ..RunConfig::default()
    };
    let graph = ResearchGraph::build(&config, gateway).unwrap();
    assert_eq!(
      graph.branch(SUPERVISOR, outcome::CLARIFY),
      Some(AWAIT_CLARIFICATION)
    );
  }

  #[test]
  fn test_zero_iterations_rejected() {
    let config = RunConfig {
      max_iterations: 0,
      ..RunConfig::default()
    };
    let result = ResearchGraph::build(&config, Arc::new(ScriptedGateway::new([])));
    assert!(matches!(result, Err(ConfigError::InvalidLimit { .. })));
  }

  #[test]
  fn test_capabilities_add_think_once() {
    let gateway: Arc<dyn Gateway> = Arc::new(ScriptedGateway::new([]));
    let caps = ResearchGraph::capabilities(gateway, ToolRegistry::new());
    assert!(caps.tools.contains(ThinkTool::NAME));
    assert_eq!(caps.tools.len(), 1);
  }

  #[tokio::test]
  async fn test_think_requires_reflection() {
    let output = ThinkTool
      .invoke(json!({ "reflection": "need sources" }), ToolContext::default())
      .await
      .unwrap();
    assert_eq!(output, json!("Reflection recorded: need sources"));

    let err = ThinkTool.invoke(json!({}), ToolContext::default()).await.unwrap_err();
    assert!(matches!(err, ToolError::InvalidArguments { .. }));
  }

  #[test]
  fn test_synthesize_marks_partial_on_gaps() {
    use delve_state::{NoteStatus, ResearchNote};

    let mut state = StateRecord::new("run-1", "rust async", SYNTHESIZE);
    state.context_mut().insert(keys::research_brief(), "Research brief: rust async");
    state.context_mut().insert(keys::supervisor_forced_stop(), false);
    state
      .push_notes([
        ResearchNote::ok("conduct_research", "tokio is a runtime").with_goal(Some("tokio".into())),
        ResearchNote::failed("conduct_research", NoteStatus::UnitTimedOut, "unit failed: timeout after 10ms"),
      ])
      .unwrap();

    let TransformOutcome::Succeed(output) = synthesize(&mut state).unwrap() else {
      panic!("synthesize must succeed");
    };
    assert_eq!(output.kind, OutputKind::Partial);
    assert!(output.content.contains("tokio: tokio is a runtime"));
    assert!(output.content.contains("## Gaps"));
  }
}
