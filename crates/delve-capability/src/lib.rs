//! Delve Capability
//!
//! Interfaces for the external collaborators the engine consumes:
//!
//! - [`Gateway`]: the language-model capability. Given history, the available
//!   tool descriptors and the execution context, it proposes the next
//!   [`Action`].
//! - [`Tool`] and [`ToolRegistry`]: name-keyed, opaque tool invocations.
//!
//! The [`replay`] module provides deterministic implementations of both,
//! used by the CLI to replay scripted scenarios and by tests.

mod error;
mod gateway;
pub mod replay;
mod tool;

pub use delve_state::ToolCall;
pub use error::{GatewayError, ToolError};
pub use gateway::{Action, Gateway, ProposeRequest, propose_within};
pub use tool::{Tool, ToolContext, ToolDescriptor, ToolRegistry};
