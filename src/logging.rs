//! Diagnostic tracing for the CLI.
//!
//! Reads `RUST_LOG` and defaults to `warn`. Output goes to stderr so stdout
//! stays reserved for the run report.
//!
//! ```bash
//! RUST_LOG=delve_engine=debug delve run scenario.json
//! ```

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(std::io::stderr).compact())
    .init();
}
