//! Diagnostics via `tracing`, written to stderr.
//!
//! Two kinds of output exist and they do not overlap:
//!
//! - **Tracing (this module)**: diagnostics filtered by `RUST_LOG`. Not
//!   persisted.
//! - **Session logs (`io/session_log`)**: product artifacts under
//!   `.prd/logs/`. Always written, unaffected by `RUST_LOG`.
//!
//! Console progress printed by the CLI goes to stdout, so redirecting stderr
//! never hides it.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const QUIET_FILTER: &str = "warn";
const VERBOSE_FILTER: &str = "warn,prd_loop=info";

/// Filter used when `RUST_LOG` is unset.
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose { VERBOSE_FILTER } else { QUIET_FILTER }
}

/// Install the global subscriber. `RUST_LOG` wins over `verbose`.
///
/// ```bash
/// RUST_LOG=prd_loop=debug prd-loop run
/// ```
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_enables_crate_info() {
        assert_eq!(default_filter(false), "warn");
        assert!(default_filter(true).contains("prd_loop=info"));
        assert!(EnvFilter::try_new(default_filter(true)).is_ok());
    }
}
