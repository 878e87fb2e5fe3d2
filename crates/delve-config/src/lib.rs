//! Delve Config
//!
//! Serializable configuration consumed by the delve execution engine. These
//! types describe how a run is bounded (dispatch budget, timeouts) and how the
//! supervisor's tool loop behaves (iteration cap, concurrency ceiling,
//! spawnable tool names).
//!
//! Configuration can be loaded from JSON (the CLI reads `config.json` from the
//! data directory or `--config`). Every field has a default, so an empty
//! object is a valid configuration:
//!
//! ```json
//! {
//!   "allow_clarification": true,
//!   "max_iterations": 4,
//!   "max_concurrent_units": 3,
//!   "unit_timeout_ms": 30000,
//!   "spawnable_tools": ["conduct_research"]
//! }
//! ```

mod limits;
mod run;

pub use limits::{PoolConfig, RunLimits};
pub use run::RunConfig;
