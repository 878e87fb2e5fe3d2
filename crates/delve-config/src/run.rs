use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::limits::{PoolConfig, RunLimits};

/// Default cap on supervisor reason-act cycles.
pub const DEFAULT_MAX_ITERATIONS: u32 = 6;
/// Default ceiling on concurrently running sub-task units.
pub const DEFAULT_MAX_CONCURRENT_UNITS: usize = 5;
/// Default per-unit timeout.
pub const DEFAULT_UNIT_TIMEOUT_MS: u64 = 120_000;
/// Default global phase dispatch budget.
pub const DEFAULT_MAX_DISPATCHES: u32 = 64;
/// Default wait for a single gateway proposal.
pub const DEFAULT_GATEWAY_TIMEOUT_MS: u64 = 300_000;
/// Default wall-clock limit for a whole run.
pub const DEFAULT_RUN_TIMEOUT_MS: u64 = 1_800_000;

/// Configuration for a single run of a research graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
  /// Whether the clarification phase (and the supervisor) may halt the run
  /// to ask the caller a question.
  pub allow_clarification: bool,

  /// Maximum reason-act cycles the supervisor may run before it is forced
  /// to stop and hand over to synthesis.
  pub max_iterations: u32,

  /// Maximum number of spawnable units running at the same time.
  pub max_concurrent_units: usize,

  /// Per-invocation tool timeout in milliseconds, applied to pooled units and
  /// serial calls alike. `None` disables the timeout.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub unit_timeout_ms: Option<u64>,

  /// How long one gateway proposal may take in milliseconds. A proposal that
  /// times out fails the run. `None` waits indefinitely.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub gateway_timeout_ms: Option<u64>,

  /// Tool names whose invocations are handed to the sub-task pool instead of
  /// being executed serially.
  pub spawnable_tools: Vec<String>,

  /// Global budget of phase dispatches per run.
  pub max_dispatches: u32,

  /// Wall-clock limit for the whole run in milliseconds. Reaching it is
  /// treated like an external cancellation.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub run_timeout_ms: Option<u64>,
}

impl Default for RunConfig {
  fn default() -> Self {
    Self {
      allow_clarification: false,
      max_iterations: DEFAULT_MAX_ITERATIONS,
      max_concurrent_units: DEFAULT_MAX_CONCURRENT_UNITS,
      unit_timeout_ms: Some(DEFAULT_UNIT_TIMEOUT_MS),
      gateway_timeout_ms: Some(DEFAULT_GATEWAY_TIMEOUT_MS),
      spawnable_tools: vec!["conduct_research".to_string()],
      max_dispatches: DEFAULT_MAX_DISPATCHES,
      run_timeout_ms: Some(DEFAULT_RUN_TIMEOUT_MS),
    }
  }
}

impl RunConfig {
  /// Parse a configuration from a JSON string.
  pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(content)
  }

  /// Executor-level limits derived from this configuration.
  pub fn limits(&self) -> RunLimits {
    RunLimits {
      max_dispatches: self.max_dispatches,
      run_timeout: self.run_timeout_ms.map(Duration::from_millis),
    }
  }

  /// Sub-task pool settings derived from this configuration.
  pub fn pool(&self) -> PoolConfig {
    PoolConfig {
      max_concurrent_units: self.max_concurrent_units,
      unit_timeout: self.unit_timeout_ms.map(Duration::from_millis),
    }
  }

  /// Wait limit for a single gateway proposal.
  pub fn gateway_timeout(&self) -> Option<Duration> {
    self.gateway_timeout_ms.map(Duration::from_millis)
  }

  /// Whether invocations of `tool` should go through the sub-task pool.
  pub fn is_spawnable(&self, tool: &str) -> bool {
    self.spawnable_tools.iter().any(|t| t == tool)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_object_uses_defaults() {
    let config = RunConfig::from_json("{}").unwrap();
    assert_eq!(config, RunConfig::default());
    assert!(!config.allow_clarification);
    assert_eq!(config.max_iterations, DEFAULT_MAX_ITERATIONS);
  }

  #[test]
  fn test_defaults_bound_every_wait() {
    let config = RunConfig::default();
    assert_eq!(
      config.limits().run_timeout,
      Some(Duration::from_millis(DEFAULT_RUN_TIMEOUT_MS))
    );
    assert_eq!(
      config.gateway_timeout(),
      Some(Duration::from_millis(DEFAULT_GATEWAY_TIMEOUT_MS))
    );
    assert_eq!(
      config.pool().unit_timeout,
      Some(Duration::from_millis(DEFAULT_UNIT_TIMEOUT_MS))
    );

    let unbounded =
      RunConfig::from_json(r#"{"gateway_timeout_ms": null, "run_timeout_ms": null}"#).unwrap();
    assert_eq!(unbounded.gateway_timeout(), None);
    assert_eq!(unbounded.limits().run_timeout, None);
  }

  #[test]
  fn test_partial_override() {
    let config = RunConfig::from_json(
      r#"{"allow_clarification": true, "max_concurrent_units": 2, "unit_timeout_ms": null}"#,
    )
    .unwrap();

    assert!(config.allow_clarification);
    assert_eq!(config.max_concurrent_units, 2);
    assert_eq!(config.unit_timeout_ms, None);
    assert_eq!(config.spawnable_tools, vec!["conduct_research".to_string()]);
  }

  #[test]
  fn test_limits_and_pool() {
    let config = RunConfig {
      run_timeout_ms: Some(1500),
      unit_timeout_ms: Some(250),
      max_dispatches: 10,
      max_concurrent_units: 3,
      ..Default::default()
    };

    let limits = config.limits();
    assert_eq!(limits.max_dispatches, 10);
    assert_eq!(limits.run_timeout, Some(Duration::from_millis(1500)));

    let pool = config.pool();
    assert_eq!(pool.max_concurrent_units, 3);
    assert_eq!(pool.unit_timeout, Some(Duration::from_millis(250)));
  }

  #[test]
  fn test_is_spawnable() {
    let config = RunConfig::default();
    assert!(config.is_spawnable("conduct_research"));
    assert!(!config.is_spawnable("think"));
  }
}
