//! Tracing setup for nimbus binaries.
//!
//! Library crates only emit `tracing` events; binaries call
//! [`init_tracing`] once at startup. The filter comes from `RUST_LOG` and
//! falls back to the directive the binary passes:
//!
//! ```bash
//! RUST_LOG=nimbus_vfs=debug nimbus fsck
//! ```
//!
//! Output goes to stderr so that command output on stdout stays parseable.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter from `RUST_LOG`, or `default_directive` when unset or invalid.
pub fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Install the global subscriber: env filter plus a stderr fmt layer.
///
/// Fails if a global subscriber is already set.
pub fn init_tracing(default_directive: &str) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter(default_directive))
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        assert!(init_tracing("warn").is_ok());
        assert!(init_tracing("warn").is_err());
        tracing::info!("subscriber installed");
    }
}
