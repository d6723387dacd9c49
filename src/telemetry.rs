//! Logging setup
//!
//! The library only emits `tracing` events; binaries and tests decide where they go.
//! Both subscribers write to stderr so reports on stdout stay machine-readable.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise from `default_directive`
/// (e.g. `"info"` or `"netcfg=debug"`). Calling this more than once is harmless;
/// later calls leave the first subscriber in place.
pub fn init_logging(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

/// Same as [`init_logging`] but emits one JSON object per event.
pub fn init_json_logging(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_is_harmless() {
        init_logging("debug");
        init_logging("info");
        init_json_logging("info");
        tracing::info!(target: "netcfg", "still logging");
    }
}
