use thiserror::Error;

/// Failures of the language-model gateway. Run-fatal; the engine never retries them.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
  /// The gateway could not be reached.
  #[error("gateway unreachable: {message}")]
  Unreachable { message: String },

  /// The gateway answered with something that is not a valid action.
  #[error("malformed gateway response: {message}")]
  MalformedResponse { message: String },

  /// A scripted gateway ran out of actions.
  #[error("gateway script exhausted after {proposals} proposals")]
  Exhausted { proposals: usize },

  /// No proposal arrived within the configured gateway timeout.
  #[error("gateway timed out after {after_ms}ms")]
  TimedOut { after_ms: u64 },
}

/// Failures of a single tool invocation. Recorded and folded into the
/// reasoning context; never run-fatal on their own.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
  #[error("tool not found: {name}")]
  NotFound { name: String },

  #[error("invalid arguments for tool '{tool}': {message}")]
  InvalidArguments { tool: String, message: String },

  #[error("tool '{tool}' failed: {message}")]
  Failed { tool: String, message: String },

  #[error("tool '{tool}' timed out after {after_ms}ms")]
  TimedOut { tool: String, after_ms: u64 },
}

impl ToolError {
  pub fn failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
    Self::Failed {
      tool: tool.into(),
      message: message.into(),
    }
  }
}
