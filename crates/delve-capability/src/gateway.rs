use std::time::Duration;

use async_trait::async_trait;
use delve_state::{ExecutionContext, Message, ToolCall};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::tool::ToolDescriptor;

/// Next step proposed by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
  /// Execute zero or more tool invocations, then reason again.
  ToolCalls { calls: Vec<ToolCall> },
  /// Halt and ask the caller a question.
  Clarify { question: String },
  /// Research is done; move on to synthesis.
  Stop {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
  },
}

impl Action {
  pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
    Self::ToolCalls { calls }
  }

  pub fn clarify(question: impl Into<String>) -> Self {
    Self::Clarify {
      question: question.into(),
    }
  }

  pub fn stop(reason: impl Into<String>) -> Self {
    Self::Stop {
      reason: Some(reason.into()),
    }
  }
}

/// Everything the gateway sees when asked for the next action.
#[derive(Debug, Clone, Copy)]
pub struct ProposeRequest<'a> {
  pub run_id: &'a str,
  /// Phase asking for the proposal.
  pub phase: &'a str,
  /// 1-based reason-act cycle within the phase.
  pub iteration: u32,
  pub history: &'a [Message],
  pub tools: &'a [ToolDescriptor],
  pub context: &'a ExecutionContext,
}

/// The language-model capability.
///
/// Implementations own transport, prompting and retries. A returned error
/// aborts the calling phase and fails the run.
#[async_trait]
pub trait Gateway: Send + Sync {
  /// Propose the next action given the conversation so far.
  async fn propose(&self, request: ProposeRequest<'_>) -> Result<Action, GatewayError>;
}

/// Ask `gateway` for the next action, giving up after `limit`.
pub async fn propose_within(
  gateway: &dyn Gateway,
  request: ProposeRequest<'_>,
  limit: Option<Duration>,
) -> Result<Action, GatewayError> {
  let Some(limit) = limit else {
    return gateway.propose(request).await;
  };

  match tokio::time::timeout(limit, gateway.propose(request)).await {
    Ok(result) => result,
    Err(_) => Err(GatewayError::TimedOut {
      after_ms: limit.as_millis() as u64,
    }),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::replay::ScriptedGateway;
  use delve_state::ExecutionContext;
  use serde_json::json;

  fn request(context: &ExecutionContext) -> ProposeRequest<'_> {
    ProposeRequest {
      run_id: "run-1",
      phase: "supervisor",
      iteration: 1,
      history: &[],
      tools: &[],
      context,
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_propose_within_times_out_stalled_gateway() {
    let gateway = ScriptedGateway::new([Action::stop("done")])
      .with_delay(Duration::from_secs(365 * 24 * 60 * 60));
    let context = ExecutionContext::new();

    let err = propose_within(&gateway, request(&context), Some(Duration::from_secs(2)))
      .await
      .unwrap_err();
    assert!(matches!(err, GatewayError::TimedOut { after_ms: 2000 }));
    assert_eq!(gateway.proposals(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_propose_within_passes_timely_answer() {
    let gateway = ScriptedGateway::new([Action::stop("done")]).with_delay(Duration::from_millis(10));
    let context = ExecutionContext::new();

    let action = propose_within(&gateway, request(&context), Some(Duration::from_secs(2)))
      .await
      .unwrap();
    assert_eq!(action, Action::stop("done"));

    let context = ExecutionContext::new();
    let err = propose_within(&gateway, request(&context), None).await.unwrap_err();
    assert!(matches!(err, GatewayError::Exhausted { proposals: 1 }));
  }

  #[test]
  fn test_action_wire_format() {
    let action: Action = serde_json::from_value(json!({
      "type": "tool_calls",
      "calls": [
        { "id": "c1", "name": "conduct_research", "arguments": { "research_topic": "tokio" } }
      ]
    }))
    .unwrap();

    match action {
      Action::ToolCalls { calls } => {
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "conduct_research");
      }
      other => panic!("unexpected action: {:?}", other),
    }

    let stop: Action = serde_json::from_value(json!({ "type": "stop" })).unwrap();
    assert_eq!(stop, Action::Stop { reason: None });

    let clarify = serde_json::to_value(Action::clarify("which year?")).unwrap();
    assert_eq!(clarify, json!({ "type": "clarify", "question": "which year?" }));
  }
}
