use tracing_subscriber::EnvFilter;

/// Initialize tracing/logging for the process.
///
/// Respects `RUST_LOG` when set; otherwise falls back to `default_level`
/// (e.g. "info", "debug", or a full filter directive).
pub fn init(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Use try_init so tests and libraries can call this multiple times without panicking
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
