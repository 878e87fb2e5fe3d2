//! Phase kinds and the traits behind user-defined phases.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use delve_config::PoolConfig;
use delve_state::{ContextKey, FinalOutput, StateRecord, keys};
use tokio_util::sync::CancellationToken;

use crate::error::PhaseError;

/// Outcome values produced by tool-loop phases.
pub mod outcome {
  /// The loop finished, by the gateway's choice or by the iteration cap.
  pub const STOP: &str = "stop";
  /// The gateway asked the caller a question.
  pub const CLARIFY: &str = "clarify";
}

/// Result of a transform phase.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformOutcome {
  /// Continue to the phase's only successor.
  Next,
  /// End the run successfully. Only valid in a terminal phase.
  Succeed(FinalOutput),
  /// End the run with a phase failure.
  Fail(String),
}

/// A phase that rewrites the working copy of the state record.
///
/// Implementations may append to history and write their declared context
/// keys. Everything else is checked by the executor after the phase returns.
#[async_trait]
pub trait Transform: Send + Sync {
  async fn apply(
    &self,
    state: &mut StateRecord,
    cancel: &CancellationToken,
  ) -> Result<TransformOutcome, PhaseError>;
}

/// A phase that chooses one of its declared outcomes.
#[async_trait]
pub trait Decide: Send + Sync {
  async fn decide(
    &self,
    state: &mut StateRecord,
    cancel: &CancellationToken,
  ) -> Result<String, PhaseError>;
}

/// Synchronous transform backed by a closure.
pub struct TransformFn<F>(F);

#[async_trait]
impl<F> Transform for TransformFn<F>
where
  F: Fn(&mut StateRecord) -> Result<TransformOutcome, PhaseError> + Send + Sync,
{
  async fn apply(
    &self,
    state: &mut StateRecord,
    _cancel: &CancellationToken,
  ) -> Result<TransformOutcome, PhaseError> {
    (self.0)(state)
  }
}

/// Synchronous decision backed by a closure.
pub struct DecideFn<F>(F);

#[async_trait]
impl<F> Decide for DecideFn<F>
where
  F: Fn(&mut StateRecord) -> Result<String, PhaseError> + Send + Sync,
{
  async fn decide(
    &self,
    state: &mut StateRecord,
    _cancel: &CancellationToken,
  ) -> Result<String, PhaseError> {
    (self.0)(state)
  }
}

/// Settings of a reason-act tool loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolLoopSpec {
  /// Whether the gateway may end the loop with a clarification request.
  pub allow_clarification: bool,
  /// Maximum reason-act cycles before a forced stop.
  pub max_iterations: u32,
  /// Tools whose calls run as concurrent units through the sub-task pool.
  pub spawnable_tools: BTreeSet<String>,
  /// Pool settings for spawnable calls. The unit timeout also bounds serial calls.
  pub pool: PoolConfig,
  /// Wait limit for each gateway proposal.
  pub propose_timeout: Option<Duration>,
}

impl ToolLoopSpec {
  pub fn new(max_iterations: u32, pool: PoolConfig) -> Self {
    Self {
      allow_clarification: false,
      max_iterations,
      spawnable_tools: BTreeSet::new(),
      pool,
      propose_timeout: None,
    }
  }

  pub fn propose_timeout(mut self, limit: Option<Duration>) -> Self {
    self.propose_timeout = limit;
    self
  }

  pub fn allow_clarification(mut self, allow: bool) -> Self {
    self.allow_clarification = allow;
    self
  }

  pub fn spawnable<I, S>(mut self, tools: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.spawnable_tools.extend(tools.into_iter().map(Into::into));
    self
  }

  pub fn is_spawnable(&self, tool: &str) -> bool {
    self.spawnable_tools.contains(tool)
  }

  /// Outcomes the loop can produce.
  pub fn outcomes(&self) -> Vec<String> {
    let mut outcomes = vec![outcome::STOP.to_string()];
    if self.allow_clarification {
      outcomes.push(outcome::CLARIFY.to_string());
    }
    outcomes
  }

  /// Context keys the loop writes.
  pub fn writes(&self) -> Vec<ContextKey> {
    let mut writes = vec![
      keys::research_notes(),
      keys::supervisor_iterations(),
      keys::supervisor_forced_stop(),
      keys::supervisor_stop_reason(),
    ];
    if self.allow_clarification {
      writes.push(keys::clarify_question());
    }
    writes
  }
}

/// Settings of a fan-out phase: run one spawnable tool per element of an
/// array stored in the context.
#[derive(Debug, Clone, PartialEq)]
pub struct FanOutSpec {
  /// Key holding an array of argument objects, one per unit.
  pub source: ContextKey,
  /// Tool invoked for every element.
  pub tool: String,
  pub pool: PoolConfig,
}

impl FanOutSpec {
  pub fn new(source: ContextKey, tool: impl Into<String>, pool: PoolConfig) -> Self {
    Self {
      source,
      tool: tool.into(),
      pool,
    }
  }
}

/// The closed set of phase kinds the executor dispatches.
#[derive(Clone)]
pub enum PhaseKind {
  Transform(Arc<dyn Transform>),
  Decide {
    decider: Arc<dyn Decide>,
    outcomes: Vec<String>,
  },
  ToolLoop(ToolLoopSpec),
  FanOut(FanOutSpec),
}

impl PhaseKind {
  pub fn name(&self) -> &'static str {
    match self {
      PhaseKind::Transform(_) => "transform",
      PhaseKind::Decide { .. } => "decide",
      PhaseKind::ToolLoop(_) => "tool_loop",
      PhaseKind::FanOut(_) => "fan_out",
    }
  }

  /// Whether successors are chosen by outcome rather than a single edge.
  pub fn is_branching(&self) -> bool {
    matches!(self, PhaseKind::Decide { .. } | PhaseKind::ToolLoop(_))
  }

  /// Declared outcomes of a branching phase. Empty for the others.
  pub fn outcomes(&self) -> Vec<String> {
    match self {
      PhaseKind::Decide { outcomes, .. } => outcomes.clone(),
      PhaseKind::ToolLoop(spec) => spec.outcomes(),
      PhaseKind::Transform(_) | PhaseKind::FanOut(_) => Vec::new(),
    }
  }

  fn pool(&self) -> Option<&PoolConfig> {
    match self {
      PhaseKind::ToolLoop(spec) => Some(&spec.pool),
      PhaseKind::FanOut(spec) => Some(&spec.pool),
      PhaseKind::Transform(_) | PhaseKind::Decide { .. } => None,
    }
  }

  /// Describe the first zero limit, if any.
  pub(crate) fn invalid_limit(&self) -> Option<String> {
    if let PhaseKind::ToolLoop(spec) = self {
      if spec.max_iterations == 0 {
        return Some("max_iterations must be at least 1".to_string());
      }
    }
    let pool = self.pool()?;
    if pool.max_concurrent_units == 0 {
      return Some("max_concurrent_units must be at least 1".to_string());
    }
    if pool.unit_timeout.is_some_and(|t| t.is_zero()) {
      return Some("unit_timeout must be positive".to_string());
    }
    None
  }
}

impl fmt::Debug for PhaseKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PhaseKind::Transform(_) => f.write_str("Transform"),
      PhaseKind::Decide { outcomes, .. } => {
        f.debug_struct("Decide").field("outcomes", outcomes).finish()
      }
      PhaseKind::ToolLoop(spec) => f.debug_tuple("ToolLoop").field(spec).finish(),
      PhaseKind::FanOut(spec) => f.debug_tuple("FanOut").field(spec).finish(),
    }
  }
}

/// A named unit of work in a graph.
#[derive(Debug, Clone)]
pub struct Phase {
  pub name: String,
  pub kind: PhaseKind,
  /// Context keys the phase expects to find.
  pub reads: Vec<ContextKey>,
  /// Context keys the phase may write. Writes to anything else are rejected.
  pub writes: Vec<ContextKey>,
}

impl Phase {
  pub fn new(name: impl Into<String>, kind: PhaseKind) -> Self {
    Self {
      name: name.into(),
      kind,
      reads: Vec::new(),
      writes: Vec::new(),
    }
  }

  pub fn transform(name: impl Into<String>, transform: impl Transform + 'static) -> Self {
    Self::new(name, PhaseKind::Transform(Arc::new(transform)))
  }

  /// Transform from a synchronous closure.
  pub fn transform_fn<F>(name: impl Into<String>, f: F) -> Self
  where
    F: Fn(&mut StateRecord) -> Result<TransformOutcome, PhaseError> + Send + Sync + 'static,
  {
    Self::transform(name, TransformFn(f))
  }

  pub fn decide<I, S>(name: impl Into<String>, outcomes: I, decider: impl Decide + 'static) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self::new(
      name,
      PhaseKind::Decide {
        decider: Arc::new(decider),
        outcomes: outcomes.into_iter().map(Into::into).collect(),
      },
    )
  }

  /// Decision from a synchronous closure.
  pub fn decide_fn<I, S, F>(name: impl Into<String>, outcomes: I, f: F) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
    F: Fn(&mut StateRecord) -> Result<String, PhaseError> + Send + Sync + 'static,
  {
    Self::decide(name, outcomes, DecideFn(f))
  }

  /// Tool loop; declares the keys the loop writes.
  pub fn tool_loop(name: impl Into<String>, spec: ToolLoopSpec) -> Self {
    let writes = spec.writes();
    Self {
      writes,
      ..Self::new(name, PhaseKind::ToolLoop(spec))
    }
  }

  /// Fan-out; declares its source as a read and the notes as a write.
  pub fn fan_out(name: impl Into<String>, spec: FanOutSpec) -> Self {
    let reads = vec![spec.source.clone()];
    Self {
      reads,
      writes: vec![keys::research_notes()],
      ..Self::new(name, PhaseKind::FanOut(spec))
    }
  }

  pub fn reads(mut self, key: ContextKey) -> Self {
    if !self.reads.contains(&key) {
      self.reads.push(key);
    }
    self
  }

  pub fn writes(mut self, key: ContextKey) -> Self {
    if !self.writes.contains(&key) {
      self.writes.push(key);
    }
    self
  }

  pub fn may_write(&self, key: &ContextKey) -> bool {
    self.writes.contains(key)
  }
}
