use std::fmt;
use std::sync::Arc;

use delve_capability::{Gateway, ToolRegistry};

/// External collaborators a run may use.
///
/// Passed to the executor explicitly; nothing in the engine reaches for a
/// process-wide gateway or registry.
#[derive(Clone)]
pub struct Capabilities {
  pub gateway: Arc<dyn Gateway>,
  pub tools: Arc<ToolRegistry>,
}

impl Capabilities {
  pub fn new(gateway: Arc<dyn Gateway>, tools: ToolRegistry) -> Self {
    Self {
      gateway,
      tools: Arc::new(tools),
    }
  }
}

impl fmt::Debug for Capabilities {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Capabilities")
      .field("tools", &self.tools)
      .finish_non_exhaustive()
  }
}
