//! Deterministic capability implementations.
//!
//! [`ScriptedGateway`] replays a fixed sequence of actions. [`CannedTool`]
//! returns a fixed output or error after an optional delay. [`FnTool`] adapts
//! an async closure. The CLI builds these from a scenario file; tests build
//! them directly.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use delve_state::Message;

use crate::error::{GatewayError, ToolError};
use crate::gateway::{Action, Gateway, ProposeRequest};
use crate::tool::{Tool, ToolContext, ToolDescriptor};

/// A proposal request as observed by a [`ScriptedGateway`].
#[derive(Debug, Clone)]
pub struct RecordedProposal {
  pub phase: String,
  pub iteration: u32,
  pub history: Vec<Message>,
  pub tools: Vec<String>,
}

#[derive(Default)]
struct Script {
  queue: VecDeque<Action>,
  recorded: Vec<RecordedProposal>,
}

/// Gateway that answers proposals from a queue.
///
/// When the queue runs dry it returns the repeat action if one was set,
/// otherwise [`GatewayError::Exhausted`].
#[derive(Default)]
pub struct ScriptedGateway {
  script: Mutex<Script>,
  repeat: Option<Action>,
  delay: Option<Duration>,
}

impl ScriptedGateway {
  pub fn new(actions: impl IntoIterator<Item = Action>) -> Self {
    Self {
      script: Mutex::new(Script {
        queue: actions.into_iter().collect(),
        recorded: Vec::new(),
      }),
      repeat: None,
      delay: None,
    }
  }

  /// Wait `delay` before answering each proposal.
  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  /// Answer every proposal past the end of the script with `action`.
  pub fn repeating(mut self, action: Action) -> Self {
    self.repeat = Some(action);
    self
  }

  /// Proposals seen so far, in order.
  pub fn recorded(&self) -> Vec<RecordedProposal> {
    self.lock().recorded.clone()
  }

  /// Number of proposals answered or refused so far.
  pub fn proposals(&self) -> usize {
    self.lock().recorded.len()
  }

  /// Actions left in the queue.
  pub fn remaining(&self) -> usize {
    self.lock().queue.len()
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
    // A poisoned script only means a test panicked mid-proposal; the data is still usable.
    self.script.lock().unwrap_or_else(|e| e.into_inner())
  }
}

#[async_trait]
impl Gateway for ScriptedGateway {
  async fn propose(&self, request: ProposeRequest<'_>) -> Result<Action, GatewayError> {
    let answer = {
      let mut script = self.lock();
      script.recorded.push(RecordedProposal {
        phase: request.phase.to_string(),
        iteration: request.iteration,
        history: request.history.to_vec(),
        tools: request.tools.iter().map(|t| t.name.clone()).collect(),
      });

      match script.queue.pop_front() {
        Some(action) => Ok(action),
        None => match &self.repeat {
          Some(action) => Ok(action.clone()),
          None => Err(GatewayError::Exhausted {
            proposals: script.recorded.len() - 1,
          }),
        },
      }
    };

    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }
    answer
  }
}

/// Tool with a fixed response.
#[derive(Debug, Clone)]
pub struct CannedTool {
  descriptor: ToolDescriptor,
  response: Result<serde_json::Value, String>,
  delay: Option<Duration>,
}

impl CannedTool {
  pub fn ok(name: impl Into<String>, output: serde_json::Value) -> Self {
    Self::new(name, Ok(output))
  }

  pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
    Self::new(name, Err(message.into()))
  }

  fn new(name: impl Into<String>, response: Result<serde_json::Value, String>) -> Self {
    let name = name.into();
    Self {
      descriptor: ToolDescriptor::new(name.clone(), format!("canned tool {}", name)),
      response,
      delay: None,
    }
  }

  pub fn with_description(mut self, description: impl Into<String>) -> Self {
    self.descriptor.description = description.into();
    self
  }

  pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
    self.descriptor.parameters = parameters;
    self
  }

  /// Sleep for `delay` before responding.
  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }
}

#[async_trait]
impl Tool for CannedTool {
  fn descriptor(&self) -> ToolDescriptor {
    self.descriptor.clone()
  }

  async fn invoke(
    &self,
    _args: serde_json::Value,
    _ctx: ToolContext,
  ) -> Result<serde_json::Value, ToolError> {
    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }

    self
      .response
      .clone()
      .map_err(|message| ToolError::failed(&self.descriptor.name, message))
  }
}

/// Tool backed by an async closure.
pub struct FnTool<F> {
  descriptor: ToolDescriptor,
  f: F,
}

impl<F, Fut> FnTool<F>
where
  F: Fn(serde_json::Value, ToolContext) -> Fut + Send + Sync,
  Fut: Future<Output = Result<serde_json::Value, ToolError>> + Send,
{
  pub fn new(descriptor: ToolDescriptor, f: F) -> Self {
    Self { descriptor, f }
  }
}

#[async_trait]
impl<F, Fut> Tool for FnTool<F>
where
  F: Fn(serde_json::Value, ToolContext) -> Fut + Send + Sync,
  Fut: Future<Output = Result<serde_json::Value, ToolError>> + Send,
{
  fn descriptor(&self) -> ToolDescriptor {
    self.descriptor.clone()
  }

  async fn invoke(
    &self,
    args: serde_json::Value,
    ctx: ToolContext,
  ) -> Result<serde_json::Value, ToolError> {
    (self.f)(args, ctx).await
  }
}
