//! Replay scenarios: a scripted gateway and canned tools loaded from JSON.
//!
//! ```json
//! {
//!   "input": "How does tokio schedule tasks?",
//!   "actions": [
//!     { "type": "tool_calls", "calls": [
//!       { "id": "c1", "name": "conduct_research", "arguments": { "research_topic": "scheduler" } }
//!     ] },
//!     { "type": "stop", "reason": "enough material" }
//!   ],
//!   "tools": [
//!     { "name": "conduct_research", "output": "tokio uses a work-stealing scheduler" }
//!   ]
//! }
//! ```

use std::time::Duration;

use delve_capability::replay::{CannedTool, ScriptedGateway};
use delve_capability::{Action, ToolRegistry};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Scenario {
  /// Research question. Falls back to stdin when absent.
  #[serde(default)]
  pub input: Option<String>,
  /// Gateway proposals, replayed in order.
  pub actions: Vec<Action>,
  /// Proposal repeated once `actions` runs out.
  #[serde(default)]
  pub repeat: Option<Action>,
  #[serde(default)]
  pub tools: Vec<ToolDef>,
}

#[derive(Debug, Deserialize)]
pub struct ToolDef {
  pub name: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub output: serde_json::Value,
  /// When set, every invocation fails with this message.
  #[serde(default)]
  pub error: Option<String>,
  #[serde(default)]
  pub delay_ms: Option<u64>,
}

impl Scenario {
  pub fn gateway(&self) -> ScriptedGateway {
    let gateway = ScriptedGateway::new(self.actions.iter().cloned());
    match &self.repeat {
      Some(action) => gateway.repeating(action.clone()),
      None => gateway,
    }
  }

  pub fn tools(&self) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for def in &self.tools {
      registry.register(def.to_tool());
    }
    registry
  }
}

impl ToolDef {
  fn to_tool(&self) -> CannedTool {
    let mut tool = match &self.error {
      Some(message) => CannedTool::failing(&self.name, message),
      None => CannedTool::ok(&self.name, self.output.clone()),
    };
    if let Some(description) = &self.description {
      tool = tool.with_description(description);
    }
    if let Some(delay) = self.delay_ms {
      tool = tool.with_delay(Duration::from_millis(delay));
    }
    tool
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_scenario() {
    let scenario: Scenario = serde_json::from_str(
      r#"{
        "actions": [{ "type": "stop" }],
        "repeat": { "type": "clarify", "question": "which runtime?" },
        "tools": [
          { "name": "conduct_research", "output": "found", "delay_ms": 5 },
          { "name": "search", "error": "offline" }
        ]
      }"#,
    )
    .unwrap();

    assert!(scenario.input.is_none());
    assert_eq!(scenario.actions, vec![Action::Stop { reason: None }]);
    assert_eq!(scenario.gateway().remaining(), 1);

    let tools = scenario.tools();
    assert_eq!(tools.names().collect::<Vec<_>>(), vec!["conduct_research", "search"]);
  }
}
