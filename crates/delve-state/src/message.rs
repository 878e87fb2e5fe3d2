use serde::{Deserialize, Serialize};

/// Role of a conversation participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  System,
  User,
  Assistant,
  Tool,
}

/// A tool invocation proposed by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
  /// Identifier correlating the call with its result message.
  pub id: String,
  /// Registered tool name.
  pub name: String,
  /// JSON arguments for the tool.
  #[serde(default)]
  pub arguments: serde_json::Value,
}

impl ToolCall {
  pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
    Self {
      id: id.into(),
      name: name.into(),
      arguments,
    }
  }

  /// Sub-goal carried in the arguments, if any (`research_topic`, `goal` or `topic`).
  pub fn goal(&self) -> Option<String> {
    ["research_topic", "goal", "topic"]
      .iter()
      .find_map(|field| self.arguments.get(field).and_then(|v| v.as_str()))
      .map(str::to_string)
  }
}

/// A single entry in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
  pub role: Role,
  pub content: String,
  /// Calls requested by the assistant (only for `Role::Assistant`).
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub tool_calls: Vec<ToolCall>,
  /// Call this message answers (only for `Role::Tool`).
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub tool_call_id: Option<String>,
  /// Whether a tool message reports a failure.
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub is_error: bool,
}

impl Message {
  fn plain(role: Role, content: impl Into<String>) -> Self {
    Self {
      role,
      content: content.into(),
      tool_calls: Vec::new(),
      tool_call_id: None,
      is_error: false,
    }
  }

  pub fn system(content: impl Into<String>) -> Self {
    Self::plain(Role::System, content)
  }

  pub fn user(content: impl Into<String>) -> Self {
    Self::plain(Role::User, content)
  }

  pub fn assistant(content: impl Into<String>) -> Self {
    Self::plain(Role::Assistant, content)
  }

  /// Assistant message carrying the calls it requested.
  pub fn assistant_calls(tool_calls: Vec<ToolCall>) -> Self {
    Self {
      tool_calls,
      ..Self::plain(Role::Assistant, "")
    }
  }

  /// Successful tool result.
  pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
    Self {
      tool_call_id: Some(call_id.into()),
      ..Self::plain(Role::Tool, content)
    }
  }

  /// Failed tool result, visible to subsequent reasoning.
  pub fn tool_failure(call_id: impl Into<String>, content: impl Into<String>) -> Self {
    Self {
      is_error: true,
      ..Self::tool_result(call_id, content)
    }
  }
}
