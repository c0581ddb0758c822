//! Development-time tracing for debugging the workflow runner.
//!
//! Diagnostics go to stderr and are controlled via `RUST_LOG`; they are not
//! part of the product output (the gradient table on stdout and the solver
//! logs under each perturbation workdir are).

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing subscriber for development logging.
///
/// Reads `RUST_LOG` env var. Defaults to `warn` if unset.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=findiff=debug findiff -f inv_NACA0012.cfg
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
