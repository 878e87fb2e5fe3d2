//! Tool capability set.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use delve_state::NotesSnapshot;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;

/// Description of a tool as presented to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
  pub name: String,
  pub description: String,
  /// JSON schema of the arguments.
  #[serde(default)]
  pub parameters: serde_json::Value,
}

impl ToolDescriptor {
  pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      description: description.into(),
      parameters: serde_json::json!({ "type": "object" }),
    }
  }

  pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
    self.parameters = parameters;
    self
  }
}

/// Context handed to a tool invocation.
///
/// Tools never see the state record. They get the run identity, the call
/// they answer, and a read-only snapshot of the research notes so far.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
  pub run_id: String,
  pub call_id: String,
  /// Sub-goal assigned to this invocation, when it runs as a spawnable unit.
  pub goal: Option<String>,
  pub notes: NotesSnapshot,
}

/// An invocable tool. Tools may be pure or side-effecting; the engine treats
/// them as opaque.
#[async_trait]
pub trait Tool: Send + Sync {
  fn descriptor(&self) -> ToolDescriptor;

  async fn invoke(
    &self,
    args: serde_json::Value,
    ctx: ToolContext,
  ) -> Result<serde_json::Value, ToolError>;
}

/// Name-keyed registry of tools, built explicitly and shared read-only.
#[derive(Clone, Default)]
pub struct ToolRegistry {
  tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a tool under its descriptor name, replacing any previous one.
  pub fn register(&mut self, tool: impl Tool + 'static) -> &mut Self {
    self.register_arc(Arc::new(tool))
  }

  pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
    let name = tool.descriptor().name;
    self.tools.insert(name, tool);
    self
  }

  /// Builder-style registration.
  pub fn with(mut self, tool: impl Tool + 'static) -> Self {
    self.register(tool);
    self
  }

  pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
    self.tools.get(name).cloned()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.tools.contains_key(name)
  }

  /// Registered names in sorted order.
  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.tools.keys().map(String::as_str)
  }

  /// Descriptors in name order.
  pub fn descriptors(&self) -> Vec<ToolDescriptor> {
    self.tools.values().map(|t| t.descriptor()).collect()
  }

  /// Look up and invoke a tool by name.
  pub async fn invoke(
    &self,
    name: &str,
    args: serde_json::Value,
    ctx: ToolContext,
  ) -> Result<serde_json::Value, ToolError> {
    let tool = self.get(name).ok_or_else(|| ToolError::NotFound {
      name: name.to_string(),
    })?;
    tool.invoke(args, ctx).await
  }

  pub fn len(&self) -> usize {
    self.tools.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tools.is_empty()
  }
}

impl std::fmt::Debug for ToolRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ToolRegistry")
      .field("tools", &self.tools.keys().collect::<Vec<_>>())
      .finish()
  }
}
