use tracing_subscriber::EnvFilter;

/// Initialize structured logging for pipeline runs.
///
/// `RUST_LOG` wins when set; otherwise the `--log-level` flag value is
/// used as the filter. Targets are suppressed since every event names
/// its pipeline explicitly.
pub fn init(fallback_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}
