//! Telemetry helpers for structured logging and tracing.

use tracing_subscriber::EnvFilter;

/// Filter applied when `RUST_LOG` is not set: this crate's own targets at
/// info level, everything else silent.
const DEFAULT_DIRECTIVE: &str = "taskgate=info";

/// Initialize tracing/telemetry. Users can install their own subscriber;
/// this helper installs an env-filtered fmt subscriber if none is set.
///
/// Honors `RUST_LOG`, falling back to `taskgate=info`. Safe to call
/// repeatedly and from concurrent tests; late calls lose `try_init` and
/// are no-ops.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
        assert!(tracing::dispatcher::has_been_set());
    }
}
