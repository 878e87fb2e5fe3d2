use std::time::Duration;

/// Limits the executor enforces for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
  /// Maximum number of phase dispatches before the run fails with an
  /// iteration-limit error.
  pub max_dispatches: u32,
  /// Optional wall-clock limit, equivalent to cancelling the run.
  pub run_timeout: Option<Duration>,
}

impl Default for RunLimits {
  fn default() -> Self {
    Self {
      max_dispatches: crate::run::DEFAULT_MAX_DISPATCHES,
      run_timeout: Some(Duration::from_millis(crate::run::DEFAULT_RUN_TIMEOUT_MS)),
    }
  }
}

/// Settings for a sub-task pool batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
  /// Concurrency ceiling for units within a batch.
  pub max_concurrent_units: usize,
  /// Per-invocation tool timeout. A timed-out call is recorded as failed and
  /// never retried.
  pub unit_timeout: Option<Duration>,
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      max_concurrent_units: crate::run::DEFAULT_MAX_CONCURRENT_UNITS,
      unit_timeout: Some(Duration::from_millis(crate::run::DEFAULT_UNIT_TIMEOUT_MS)),
    }
  }
}
