//! Shared tracing configuration for the collsim workspace.
//!
//! The verifier executables and integration tests all install their
//! `tracing` subscriber through this crate. Routing setup through a single
//! place avoids copy-pasting builder logic and keeps the logging surface
//! consistent across binaries.

pub use tracing::{debug, error, info, trace, warn};

use tracing_subscriber::EnvFilter;

/// Configuration describing how the shared subscriber should behave.
#[derive(Clone, Debug)]
pub struct TracingConfig {
    /// Optional tracing directives (e.g. `collsim_core=debug,info`). When
    /// absent the crate falls back to `RUST_LOG` and finally to
    /// [`default_directive`](Self::default_directive).
    pub directives: Option<String>,
    /// Fallback directive used when neither `directives` nor `RUST_LOG`
    /// resolve to a filter.
    pub default_directive: String,
    /// Controls ANSI formatting. Disable for CI logs that strip colour codes.
    pub ansi: bool,
    /// Controls whether event targets (module paths) appear in output.
    pub include_targets: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::for_local()
    }
}

impl TracingConfig {
    /// Configuration tuned for local development (ANSI-enabled output).
    pub fn for_local() -> Self {
        Self {
            directives: None,
            default_directive: "info".to_string(),
            ansi: true,
            include_targets: true,
        }
    }

    /// Configuration tuned for CI or log collection environments.
    pub fn for_ci() -> Self {
        Self {
            directives: None,
            default_directive: "info".to_string(),
            ansi: false,
            include_targets: true,
        }
    }
}

/// Install the shared subscriber with the default configuration.
///
/// Safe to call more than once; later calls are no-ops, so tests can call
/// this without coordinating.
pub fn init() {
    init_with(TracingConfig::default());
}

/// Install the shared subscriber with an explicit configuration.
pub fn init_with(config: TracingConfig) {
    let filter = match &config.directives {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.default_directive)),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.ansi)
        .with_target(config.include_targets)
        .try_init();
}
