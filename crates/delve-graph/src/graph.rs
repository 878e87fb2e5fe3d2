use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use delve_state::ContextKey;
use serde::Serialize;

use crate::error::ConfigError;
use crate::phase::{Phase, PhaseKind};

/// A declared connection between two phases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edge {
  /// Unconditional successor of a transform or fan-out phase.
  Direct { from: String, to: String },
  /// Successor of a decide or tool-loop phase for one outcome value.
  Branch {
    from: String,
    outcome: String,
    to: String,
  },
}

impl Edge {
  pub fn direct(from: impl Into<String>, to: impl Into<String>) -> Self {
    Self::Direct {
      from: from.into(),
      to: to.into(),
    }
  }

  pub fn branch(from: impl Into<String>, outcome: impl Into<String>, to: impl Into<String>) -> Self {
    Self::Branch {
      from: from.into(),
      outcome: outcome.into(),
      to: to.into(),
    }
  }

  pub fn from(&self) -> &str {
    match self {
      Edge::Direct { from, .. } | Edge::Branch { from, .. } => from,
    }
  }

  pub fn to(&self) -> &str {
    match self {
      Edge::Direct { to, .. } | Edge::Branch { to, .. } => to,
    }
  }
}

/// One successor of a phase, as shown by [`Graph::describe`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuccessorSummary {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub outcome: Option<String>,
  pub to: String,
}

/// Documentation view of a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseSummary {
  pub name: String,
  pub kind: &'static str,
  pub reads: Vec<String>,
  pub writes: Vec<String>,
  pub terminal: bool,
  pub successors: Vec<SuccessorSummary>,
}

/// A validated, immutable phase graph.
#[derive(Debug, Clone)]
pub struct Graph {
  name: String,
  entry: String,
  /// Phase names in declaration order.
  order: Vec<String>,
  phases: HashMap<String, Phase>,
  /// Direct successor of each transform or fan-out phase.
  successors: HashMap<String, String>,
  /// Outcome -> successor for each branching phase.
  branches: HashMap<String, BTreeMap<String, String>>,
  terminals: BTreeSet<String>,
  /// Keys expected in the context before the entry phase runs.
  seeded: BTreeSet<ContextKey>,
}

impl Graph {
  /// Build and validate a graph.
  pub fn build(
    name: impl Into<String>,
    entry: impl Into<String>,
    phases: Vec<Phase>,
    edges: Vec<Edge>,
    terminals: Vec<String>,
  ) -> Result<Self, ConfigError> {
    GraphBuilder {
      name: name.into(),
      entry: Some(entry.into()),
      phases,
      edges,
      terminals,
      seeded: Vec::new(),
    }
    .build()
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn entry(&self) -> &str {
    &self.entry
  }

  pub fn phase(&self, name: &str) -> Option<&Phase> {
    self.phases.get(name)
  }

  /// Phases in declaration order.
  pub fn phases(&self) -> impl Iterator<Item = &Phase> {
    self.order.iter().filter_map(|name| self.phases.get(name))
  }

  pub fn len(&self) -> usize {
    self.order.len()
  }

  pub fn is_empty(&self) -> bool {
    self.order.is_empty()
  }

  pub fn is_terminal(&self, phase: &str) -> bool {
    self.terminals.contains(phase)
  }

  pub fn terminals(&self) -> impl Iterator<Item = &str> {
    self.terminals.iter().map(String::as_str)
  }

  pub fn seeded(&self) -> impl Iterator<Item = &ContextKey> {
    self.seeded.iter()
  }

  /// Direct successor of a transform or fan-out phase.
  pub fn successor(&self, phase: &str) -> Option<&str> {
    self.successors.get(phase).map(String::as_str)
  }

  /// Successor of a branching phase for the given outcome.
  pub fn branch(&self, phase: &str, outcome: &str) -> Option<&str> {
    self
      .branches
      .get(phase)
      .and_then(|b| b.get(outcome))
      .map(String::as_str)
  }

  /// Every phase reachable in one step from `phase`.
  pub fn successors(&self, phase: &str) -> Vec<&str> {
    let mut out: Vec<&str> = self.successor(phase).into_iter().collect();
    if let Some(branches) = self.branches.get(phase) {
      for to in branches.values() {
        if !out.contains(&to.as_str()) {
          out.push(to);
        }
      }
    }
    out
  }

  pub fn is_successor(&self, from: &str, to: &str) -> bool {
    self.successors(from).contains(&to)
  }

  /// Summaries of all phases, in declaration order.
  pub fn describe(&self) -> Vec<PhaseSummary> {
    self
      .phases()
      .map(|phase| {
        let mut successors = Vec::new();
        if let Some(to) = self.successor(&phase.name) {
          successors.push(SuccessorSummary {
            outcome: None,
            to: to.to_string(),
          });
        }
        if let Some(branches) = self.branches.get(&phase.name) {
          successors.extend(branches.iter().map(|(outcome, to)| SuccessorSummary {
            outcome: Some(outcome.clone()),
            to: to.clone(),
          }));
        }

        PhaseSummary {
          name: phase.name.clone(),
          kind: phase.kind.name(),
          reads: phase.reads.iter().map(ToString::to_string).collect(),
          writes: phase.writes.iter().map(ToString::to_string).collect(),
          terminal: self.is_terminal(&phase.name),
          successors,
        }
      })
      .collect()
  }
}

/// Incremental graph construction. Nothing is checked until [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct GraphBuilder {
  name: String,
  entry: Option<String>,
  phases: Vec<Phase>,
  edges: Vec<Edge>,
  terminals: Vec<String>,
  seeded: Vec<ContextKey>,
}

impl GraphBuilder {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      entry: None,
      phases: Vec::new(),
      edges: Vec::new(),
      terminals: Vec::new(),
      seeded: Vec::new(),
    }
  }

  pub fn entry(mut self, phase: impl Into<String>) -> Self {
    self.entry = Some(phase.into());
    self
  }

  pub fn phase(mut self, phase: Phase) -> Self {
    self.phases.push(phase);
    self
  }

  pub fn edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
    self.edges.push(Edge::direct(from, to));
    self
  }

  pub fn branch(
    mut self,
    from: impl Into<String>,
    outcome: impl Into<String>,
    to: impl Into<String>,
  ) -> Self {
    self.edges.push(Edge::branch(from, outcome, to));
    self
  }

  pub fn terminal(mut self, phase: impl Into<String>) -> Self {
    self.terminals.push(phase.into());
    self
  }

  /// Declare a key the caller places in the context before the run starts.
  pub fn seed(mut self, key: ContextKey) -> Self {
    self.seeded.push(key);
    self
  }

  pub fn build(self) -> Result<Graph, ConfigError> {
    let mut order = Vec::with_capacity(self.phases.len());
    let mut phases = HashMap::with_capacity(self.phases.len());
    for phase in self.phases {
      if phases.contains_key(&phase.name) {
        return Err(ConfigError::DuplicatePhase(phase.name));
      }
      order.push(phase.name.clone());
      phases.insert(phase.name.clone(), phase);
    }

    let entry = self.entry.unwrap_or_default();
    if !phases.contains_key(&entry) {
      return Err(ConfigError::UnknownEntry(entry));
    }

    if self.terminals.is_empty() {
      return Err(ConfigError::NoTerminal);
    }
    for terminal in &self.terminals {
      if !phases.contains_key(terminal) {
        return Err(ConfigError::UnknownTerminal(terminal.clone()));
      }
    }
    let terminals: BTreeSet<String> = self.terminals.into_iter().collect();

    // Group edges by source phase
    let mut direct: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut branching: HashMap<&str, Vec<(&str, &str)>> = HashMap::new();
    for edge in &self.edges {
      if !phases.contains_key(edge.from()) || !phases.contains_key(edge.to()) {
        return Err(ConfigError::UnknownPhase {
          from: edge.from().to_string(),
          to: edge.to().to_string(),
        });
      }
      match edge {
        Edge::Direct { from, to } => direct.entry(from.as_str()).or_default().push(to.as_str()),
        Edge::Branch { from, outcome, to } => branching
          .entry(from.as_str())
          .or_default()
          .push((outcome.as_str(), to.as_str())),
      }
    }

    let mut successors = HashMap::new();
    let mut branches = HashMap::new();
    for name in &order {
      let phase = &phases[name];
      let out_direct = direct.get(name.as_str()).map(Vec::as_slice).unwrap_or(&[]);
      let out_branch = branching.get(name.as_str()).map(Vec::as_slice).unwrap_or(&[]);

      if let Some(message) = phase.kind.invalid_limit() {
        return Err(ConfigError::InvalidLimit {
          phase: name.clone(),
          message,
        });
      }

      if terminals.contains(name) {
        if !out_direct.is_empty() || !out_branch.is_empty() {
          return Err(ConfigError::MisplacedEdge {
            phase: name.clone(),
            edge: "outgoing",
          });
        }
        if !matches!(phase.kind, PhaseKind::Transform(_)) {
          return Err(ConfigError::InvalidTerminal {
            phase: name.clone(),
            kind: phase.kind.name(),
          });
        }
        continue;
      }

      if phase.kind.is_branching() {
        if !out_direct.is_empty() {
          return Err(ConfigError::MisplacedEdge {
            phase: name.clone(),
            edge: "direct",
          });
        }
        let declared = phase.kind.outcomes();
        if declared.is_empty() {
          return Err(ConfigError::NoOutcomes {
            phase: name.clone(),
          });
        }

        let mut map = BTreeMap::new();
        for (outcome, to) in out_branch {
          if !declared.iter().any(|d| d == outcome) {
            return Err(ConfigError::UndeclaredOutcome {
              phase: name.clone(),
              outcome: outcome.to_string(),
            });
          }
          if let Some(previous) = map.insert(outcome.to_string(), to.to_string()) {
            return Err(ConfigError::AmbiguousSuccessor {
              phase: name.clone(),
              successors: vec![previous, to.to_string()],
            });
          }
        }
        for outcome in &declared {
          if !map.contains_key(outcome) {
            return Err(ConfigError::UnmappedOutcome {
              phase: name.clone(),
              outcome: outcome.clone(),
            });
          }
        }
        branches.insert(name.clone(), map);
      } else {
        if !out_branch.is_empty() {
          return Err(ConfigError::MisplacedEdge {
            phase: name.clone(),
            edge: "branch",
          });
        }
        match out_direct {
          [] => return Err(ConfigError::MissingSuccessor(name.clone())),
          [to] => {
            successors.insert(name.clone(), to.to_string());
          }
          many => {
            return Err(ConfigError::AmbiguousSuccessor {
              phase: name.clone(),
              successors: many.iter().map(|s| s.to_string()).collect(),
            });
          }
        }
      }
    }

    // Every read must be produced by some phase or seeded by the caller
    let seeded: BTreeSet<ContextKey> = self.seeded.into_iter().collect();
    let written: HashSet<&ContextKey> = phases
      .values()
      .flat_map(|p| p.writes.iter())
      .chain(seeded.iter())
      .collect();
    for name in &order {
      for key in &phases[name].reads {
        if !written.contains(key) {
          return Err(ConfigError::UnwrittenRead {
            phase: name.clone(),
            key: key.to_string(),
          });
        }
      }
    }

    Ok(Graph {
      name: self.name,
      entry,
      order,
      phases,
      successors,
      branches,
      terminals,
      seeded,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::phase::{FanOutSpec, ToolLoopSpec, TransformOutcome};
  use delve_config::PoolConfig;
  use delve_state::{FinalOutput, OutputKind};

  fn pass(name: &str) -> Phase {
    Phase::transform_fn(name, |_| Ok(TransformOutcome::Next))
  }

  fn finish(name: &str) -> Phase {
    Phase::transform_fn(name, |_| {
      Ok(TransformOutcome::Succeed(FinalOutput::new(OutputKind::Complete, "done")))
    })
  }

  fn choose(name: &str) -> Phase {
    Phase::decide_fn(name, ["left", "right"], |_| Ok("left".to_string()))
  }

  #[test]
  fn test_linear_graph() {
    let graph = GraphBuilder::new("linear")
      .entry("a")
      .phase(pass("a"))
      .phase(pass("b"))
      .phase(finish("c"))
      .edge("a", "b")
      .edge("b", "c")
      .terminal("c")
      .build()
      .unwrap();

    assert_eq!(graph.name(), "linear");
    assert_eq!(graph.entry(), "a");
    assert_eq!(graph.len(), 3);
    assert_eq!(graph.successor("a"), Some("b"));
    assert_eq!(graph.successors("c"), Vec::<&str>::new());
    assert!(graph.is_terminal("c"));
    assert!(graph.is_successor("b", "c"));
    assert!(!graph.is_successor("a", "c"));
  }

  #[test]
  fn test_dangling_edge() {
    let result = Graph::build(
      "dangling",
      "a",
      vec![pass("a"), finish("b")],
      vec![Edge::direct("a", "b"), Edge::direct("b", "missing")],
      vec!["b".to_string()],
    );

    assert!(matches!(
      result,
      Err(ConfigError::UnknownPhase { ref to, .. }) if to == "missing"
    ));
  }

  #[test]
  fn test_duplicate_phase() {
    let result = GraphBuilder::new("dup")
      .entry("a")
      .phase(finish("a"))
      .phase(finish("a"))
      .terminal("a")
      .build();

    assert_eq!(result.unwrap_err(), ConfigError::DuplicatePhase("a".into()));
  }

  #[test]
  fn test_unknown_entry_and_terminals() {
    let result = GraphBuilder::new("g").entry("x").phase(finish("a")).terminal("a").build();
    assert_eq!(result.unwrap_err(), ConfigError::UnknownEntry("x".into()));

    let result = GraphBuilder::new("g").entry("a").phase(finish("a")).build();
    assert_eq!(result.unwrap_err(), ConfigError::NoTerminal);

    let result = GraphBuilder::new("g")
      .entry("a")
      .phase(finish("a"))
      .terminal("z")
      .build();
    assert_eq!(result.unwrap_err(), ConfigError::UnknownTerminal("z".into()));
  }

  #[test]
  fn test_branch_coverage() {
    let result = GraphBuilder::new("g")
      .entry("d")
      .phase(choose("d"))
      .phase(finish("l"))
      .branch("d", "left", "l")
      .terminal("l")
      .build();
    assert_eq!(
      result.unwrap_err(),
      ConfigError::UnmappedOutcome {
        phase: "d".into(),
        outcome: "right".into()
      }
    );

    let result = GraphBuilder::new("g")
      .entry("d")
      .phase(choose("d"))
      .phase(finish("l"))
      .branch("d", "left", "l")
      .branch("d", "right", "l")
      .branch("d", "up", "l")
      .terminal("l")
      .build();
    assert!(matches!(
      result,
      Err(ConfigError::UndeclaredOutcome { ref outcome, .. }) if outcome == "up"
    ));

    let graph = GraphBuilder::new("g")
      .entry("d")
      .phase(choose("d"))
      .phase(finish("l"))
      .phase(finish("r"))
      .branch("d", "left", "l")
      .branch("d", "right", "r")
      .terminal("l")
      .terminal("r")
      .build()
      .unwrap();
    assert_eq!(graph.branch("d", "right"), Some("r"));
    assert_eq!(graph.successors("d"), vec!["l", "r"]);
  }

  #[test]
  fn test_successor_arity() {
    let result = GraphBuilder::new("g")
      .entry("a")
      .phase(pass("a"))
      .phase(finish("b"))
      .terminal("b")
      .build();
    assert_eq!(result.unwrap_err(), ConfigError::MissingSuccessor("a".into()));

    let result = GraphBuilder::new("g")
      .entry("a")
      .phase(pass("a"))
      .phase(finish("b"))
      .phase(finish("c"))
      .edge("a", "b")
      .edge("a", "c")
      .terminal("b")
      .terminal("c")
      .build();
    assert!(matches!(result, Err(ConfigError::AmbiguousSuccessor { .. })));
  }

  #[test]
  fn test_misplaced_edges() {
    let result = GraphBuilder::new("g")
      .entry("d")
      .phase(choose("d"))
      .phase(finish("l"))
      .edge("d", "l")
      .terminal("l")
      .build();
    assert_eq!(
      result.unwrap_err(),
      ConfigError::MisplacedEdge {
        phase: "d".into(),
        edge: "direct"
      }
    );

    let result = GraphBuilder::new("g")
      .entry("a")
      .phase(pass("a"))
      .phase(finish("b"))
      .branch("a", "left", "b")
      .terminal("b")
      .build();
    assert!(matches!(result, Err(ConfigError::MisplacedEdge { edge: "branch", .. })));

    let result = GraphBuilder::new("g")
      .entry("a")
      .phase(finish("a"))
      .phase(finish("b"))
      .edge("a", "b")
      .terminal("a")
      .terminal("b")
      .build();
    assert!(matches!(result, Err(ConfigError::MisplacedEdge { edge: "outgoing", .. })));
  }

  #[test]
  fn test_terminal_must_be_transform() {
    let result = GraphBuilder::new("g")
      .entry("d")
      .phase(choose("d"))
      .terminal("d")
      .build();

    assert!(matches!(result, Err(ConfigError::InvalidTerminal { kind: "decide", .. })));
  }

  #[test]
  fn test_unwritten_read() {
    let topics = ContextKey::new("plan", "topics");
    let build = |seed: bool| {
      let mut builder = GraphBuilder::new("g")
        .entry("fan")
        .phase(Phase::fan_out(
          "fan",
          FanOutSpec::new(topics.clone(), "search", PoolConfig::default()),
        ))
        .phase(finish("done"))
        .edge("fan", "done")
        .terminal("done");
      if seed {
        builder = builder.seed(topics.clone());
      }
      builder.build()
    };

    assert_eq!(
      build(false).unwrap_err(),
      ConfigError::UnwrittenRead {
        phase: "fan".into(),
        key: "plan.topics".into()
      }
    );
    assert!(build(true).is_ok());
  }

  #[test]
  fn test_zero_limits_rejected() {
    let result = GraphBuilder::new("g")
      .entry("loop")
      .phase(Phase::tool_loop("loop", ToolLoopSpec::new(0, PoolConfig::default())))
      .phase(finish("done"))
      .branch("loop", "stop", "done")
      .terminal("done")
      .build();

    assert!(matches!(result, Err(ConfigError::InvalidLimit { ref phase, .. }) if phase == "loop"));
  }

  #[test]
  fn test_describe() {
    let graph = GraphBuilder::new("g")
      .entry("loop")
      .phase(Phase::tool_loop("loop", ToolLoopSpec::new(2, PoolConfig::default())))
      .phase(finish("done"))
      .branch("loop", "stop", "done")
      .terminal("done")
      .build()
      .unwrap();

    let summaries = graph.describe();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].kind, "tool_loop");
    assert_eq!(
      summaries[0].successors,
      vec![SuccessorSummary {
        outcome: Some("stop".into()),
        to: "done".into()
      }]
    );
    assert!(summaries[0].writes.contains(&"research.notes".to_string()));
    assert!(summaries[1].terminal);
  }
}
