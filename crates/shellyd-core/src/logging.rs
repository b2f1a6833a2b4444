//! Logging initialization for the daemon.

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber for the daemon.
///
/// The level argument is the default; `RUST_LOG` overrides it when set.
/// Safe to call more than once (subsequent calls are no-ops), which keeps
/// test binaries from panicking when several tests initialize logging.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging("info");
        init_logging("debug");
        tracing::debug!("still alive");
    }
}
