//! Tracing initialization utilities.

use tracing_subscriber::{fmt, prelude::*, util::TryInitError, EnvFilter};

/// Initialize tracing with the given default filter.
///
/// The filter can be overridden by the `RUST_LOG` environment variable.
/// Fails if a global subscriber is already installed.
///
/// # Example
///
/// ```rust
/// use mcp_gateway::init_tracing;
///
/// // Debug logging for the gateway, info for everything else
/// let _ = init_tracing("mcp_gateway=debug,info");
/// ```
///
/// # Filter Syntax
///
/// The filter follows the `tracing_subscriber::EnvFilter` syntax:
/// - `info` - Enable info level for all targets
/// - `mcp_gateway=debug,info` - Debug for the gateway, info for everything else
/// - `mcp_gateway::transport=trace` - Trace level for a specific module
pub fn init_tracing(default_filter: &str) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
}
