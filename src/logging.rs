//! Diagnostic logging.
//!
//! Diagnostics go to stderr through `tracing`, filtered by `RUST_LOG`
//! (default `info`, or `debug` with `--verbose`). User-facing output such as
//! generated SQL and apply summaries stays on stdout.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Safe to call more than once.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // a second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
