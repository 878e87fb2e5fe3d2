//! Run events and notifiers for observability.
//!
//! Events are emitted during a run so consumers can observe progress, stream
//! to a UI, log, etc. Delivery is best effort and never blocks the run.

use delve_state::{OutputKind, RunError};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

/// Events emitted during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunEvent {
  /// The run has started.
  RunStarted { run_id: String, graph: String },

  /// A phase has been dispatched.
  PhaseStarted {
    run_id: String,
    phase: String,
    dispatch: u32,
  },

  /// A phase returned and its transition was committed.
  PhaseCompleted {
    run_id: String,
    phase: String,
    outcome: String,
  },

  /// A sub-task unit acquired a pool slot and started.
  UnitSpawned {
    run_id: String,
    phase: String,
    index: usize,
    call_id: String,
    tool: String,
  },

  /// A sub-task unit finished, failed, or timed out.
  UnitCompleted {
    run_id: String,
    phase: String,
    index: usize,
    call_id: String,
    status: String,
  },

  /// The run produced its final output.
  RunSucceeded { run_id: String, kind: OutputKind },

  /// The run ended with an error.
  RunFailed { run_id: String, error: RunError },

  /// The run was cancelled or timed out.
  RunCancelled { run_id: String, reason: String },
}

impl RunEvent {
  pub fn run_id(&self) -> &str {
    match self {
      RunEvent::RunStarted { run_id, .. }
      | RunEvent::PhaseStarted { run_id, .. }
      | RunEvent::PhaseCompleted { run_id, .. }
      | RunEvent::UnitSpawned { run_id, .. }
      | RunEvent::UnitCompleted { run_id, .. }
      | RunEvent::RunSucceeded { run_id, .. }
      | RunEvent::RunFailed { run_id, .. }
      | RunEvent::RunCancelled { run_id, .. } => run_id,
    }
  }
}

/// Trait for receiving run events.
///
/// The executor calls `notify` for each event; implementations decide what
/// to do with them. `notify` must not block.
pub trait RunNotifier: Send + Sync {
  fn notify(&self, event: RunEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl RunNotifier for NoopNotifier {
  fn notify(&self, _event: RunEvent) {}
}

/// A notifier that sends events to an unbounded channel.
///
/// Event volume is a handful per phase plus two per unit, so an unbounded
/// channel keeps the run from waiting on a slow consumer.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<RunEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<RunEvent>) -> Self {
    Self { sender }
  }
}

impl RunNotifier for ChannelNotifier {
  fn notify(&self, event: RunEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}

/// A notifier that fans events out to any number of subscribers.
///
/// Subscribers that fall more than `capacity` events behind lose the oldest
/// ones; the run never waits for them.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
  sender: broadcast::Sender<RunEvent>,
}

impl BroadcastNotifier {
  pub fn new(capacity: usize) -> Self {
    let (sender, _) = broadcast::channel(capacity.max(1));
    Self { sender }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
    self.sender.subscribe()
  }
}

impl RunNotifier for BroadcastNotifier {
  fn notify(&self, event: RunEvent) {
    // No subscribers is not an error
    let _ = self.sender.send(event);
  }
}
