//! Sub-task pool tests: concurrency ceiling, ordering and cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use delve_capability::replay::{CannedTool, FnTool};
use delve_capability::{ToolCall, ToolDescriptor, ToolError, ToolRegistry};
use delve_config::PoolConfig;
use delve_engine::{
  BatchContext, ChannelNotifier, NoopNotifier, RunEvent, SubtaskPool, UnitOutcome, UnitSpec,
};
use delve_graph::PhaseError;
use delve_state::NotesSnapshot;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn pool(max_concurrent_units: usize) -> SubtaskPool {
  SubtaskPool::new(PoolConfig {
    max_concurrent_units,
    unit_timeout: None,
  })
}

/// Units whose delay shrinks with their index, so later units finish first.
fn reversed_units(tool: &str, count: usize) -> Vec<UnitSpec> {
  (0..count)
    .map(|i| {
      let call = ToolCall::new(
        format!("call-{}", i),
        tool,
        json!({ "topic": format!("topic {}", i), "delay_ms": (count - i) * 10 }),
      );
      UnitSpec::from_call(i, &call)
    })
    .collect()
}

/// A tool that sleeps for `delay_ms` and records how many copies of itself
/// run at once.
fn tracked_tool(active: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) -> ToolRegistry {
  let tool = FnTool::new(
    ToolDescriptor::new("research", "Research one topic"),
    move |args, ctx| {
      let active = Arc::clone(&active);
      let peak = Arc::clone(&peak);
      async move {
        let running = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(running, Ordering::SeqCst);
        let delay = args["delay_ms"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        active.fetch_sub(1, Ordering::SeqCst);
        Ok::<_, ToolError>(json!(ctx.goal))
      }
    },
  );
  ToolRegistry::new().with(tool)
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_ceiling_and_submission_order() {
  let active = Arc::new(AtomicUsize::new(0));
  let peak = Arc::new(AtomicUsize::new(0));
  let tools = Arc::new(tracked_tool(Arc::clone(&active), Arc::clone(&peak)));
  let notes = NotesSnapshot::default();
  let (tx, mut rx) = mpsc::unbounded_channel();
  let notifier = ChannelNotifier::new(tx);
  let cancel = CancellationToken::new();

  let report = pool(2)
    .run_batch(
      reversed_units("research", 5),
      BatchContext {
        run_id: "run-1",
        phase: "supervisor",
        tools: &tools,
        notes: &notes,
        notifier: &notifier,
        cancel: &cancel,
      },
    )
    .await
    .unwrap();

  assert_eq!(report.completed(), 5);
  assert_eq!(report.peak_in_flight, 2);
  assert_eq!(peak.load(Ordering::SeqCst), 2);
  assert_eq!(active.load(Ordering::SeqCst), 0);

  let indices: Vec<_> = report.units.iter().map(|u| u.index).collect();
  assert_eq!(indices, vec![0, 1, 2, 3, 4]);
  for unit in &report.units {
    let UnitOutcome::Completed(output) = &unit.outcome else {
      panic!("unit {} did not complete", unit.index);
    };
    assert_eq!(output, &json!(format!("topic {}", unit.index)));
  }

  let mut spawned = Vec::new();
  let mut completed = Vec::new();
  while let Ok(event) = rx.try_recv() {
    match event {
      RunEvent::UnitSpawned { index, .. } => spawned.push(index),
      RunEvent::UnitCompleted { index, .. } => completed.push(index),
      _ => {}
    }
  }
  // Queued units start in submission order, but finish out of order
  assert_eq!(spawned, vec![0, 1, 2, 3, 4]);
  assert_eq!(completed.len(), 5);
  assert_ne!(completed, spawned);
}

#[tokio::test(start_paused = true)]
async fn test_single_slot_runs_serially() {
  let active = Arc::new(AtomicUsize::new(0));
  let peak = Arc::new(AtomicUsize::new(0));
  let tools = Arc::new(tracked_tool(Arc::clone(&active), Arc::clone(&peak)));
  let notes = NotesSnapshot::default();
  let cancel = CancellationToken::new();

  let report = pool(1)
    .run_batch(
      reversed_units("research", 3),
      BatchContext {
        run_id: "run-1",
        phase: "supervisor",
        tools: &tools,
        notes: &notes,
        notifier: &NoopNotifier,
        cancel: &cancel,
      },
    )
    .await
    .unwrap();

  assert_eq!(report.completed(), 3);
  assert_eq!(report.peak_in_flight, 1);
  assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_unit_does_not_affect_siblings() {
  let tools = Arc::new(
    ToolRegistry::new()
      .with(CannedTool::ok("research", json!("found it")))
      .with(CannedTool::failing("flaky", "upstream 503")),
  );
  let notes = NotesSnapshot::default();
  let cancel = CancellationToken::new();

  let units = vec![
    UnitSpec::from_call(0, &ToolCall::new("a", "research", json!({}))),
    UnitSpec::from_call(1, &ToolCall::new("b", "flaky", json!({}))),
    UnitSpec::from_call(2, &ToolCall::new("c", "research", json!({}))),
  ];
  let report = pool(3)
    .run_batch(
      units,
      BatchContext {
        run_id: "run-1",
        phase: "supervisor",
        tools: &tools,
        notes: &notes,
        notifier: &NoopNotifier,
        cancel: &cancel,
      },
    )
    .await
    .unwrap();

  assert_eq!(report.completed(), 2);
  assert_eq!(report.failed(), 1);

  let failed = &report.units[1];
  assert_eq!(failed.call_id, "b");
  assert!(failed.note().content.starts_with("unit failed:"));
  assert!(failed.note().content.contains("upstream 503"));
  assert!(failed.message().is_error);
}

#[tokio::test]
async fn test_panicking_unit_does_not_affect_siblings() {
  let fragile = FnTool::new(
    ToolDescriptor::new("fragile", "Research that panics on demand"),
    |args: serde_json::Value, _ctx| async move {
      if args["explode"].as_bool().unwrap_or(false) {
        panic!("tool bug");
      }
      Ok::<_, ToolError>(json!("steady"))
    },
  );
  let tools = Arc::new(ToolRegistry::new().with(fragile));
  let notes = NotesSnapshot::default();
  let cancel = CancellationToken::new();
  let (tx, mut rx) = mpsc::unbounded_channel();
  let notifier = ChannelNotifier::new(tx);

  let units = vec![
    UnitSpec::from_call(0, &ToolCall::new("a", "fragile", json!({}))),
    UnitSpec::from_call(1, &ToolCall::new("b", "fragile", json!({ "explode": true }))),
    UnitSpec::from_call(2, &ToolCall::new("c", "fragile", json!({}))),
  ];
  let report = pool(2)
    .run_batch(
      units,
      BatchContext {
        run_id: "run-1",
        phase: "supervisor",
        tools: &tools,
        notes: &notes,
        notifier: &notifier,
        cancel: &cancel,
      },
    )
    .await
    .unwrap();

  assert_eq!(report.units.len(), 3);
  assert_eq!(report.completed(), 2);
  assert_eq!(report.failed(), 1);
  assert!(matches!(report.units[0].outcome, UnitOutcome::Completed(_)));
  assert!(matches!(report.units[2].outcome, UnitOutcome::Completed(_)));

  let panicked = &report.units[1];
  assert_eq!(panicked.call_id, "b");
  assert!(matches!(panicked.outcome, UnitOutcome::Failed(ToolError::Failed { .. })));
  assert!(panicked.note().content.contains("panicked: tool bug"));
  assert!(panicked.message().is_error);

  let mut completed = 0;
  while let Ok(event) = rx.try_recv() {
    if matches!(event, RunEvent::UnitCompleted { .. }) {
      completed += 1;
    }
  }
  assert_eq!(completed, 3);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_aborts_batch() {
  let tools = Arc::new(ToolRegistry::new().with(
    CannedTool::ok("research", json!("never")).with_delay(Duration::from_secs(3600)),
  ));
  let notes = NotesSnapshot::default();
  let cancel = CancellationToken::new();

  let trigger = cancel.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(10)).await;
    trigger.cancel();
  });

  let units = (0..4)
    .map(|i| UnitSpec::from_call(i, &ToolCall::new(format!("c{}", i), "research", json!({}))))
    .collect();
  let result = pool(2)
    .run_batch(
      units,
      BatchContext {
        run_id: "run-1",
        phase: "supervisor",
        tools: &tools,
        notes: &notes,
        notifier: &NoopNotifier,
        cancel: &cancel,
      },
    )
    .await;

  assert!(matches!(result, Err(PhaseError::Cancelled)));
}
