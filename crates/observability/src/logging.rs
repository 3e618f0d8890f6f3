use tracing_subscriber::EnvFilter;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line, for log shippers.
    Json,
    /// Compact text; output captured per test by libtest.
    Test,
}

/// Install the global subscriber. `RUST_LOG` wins over `default_directive`.
///
/// Returns quietly if a subscriber is already installed.
pub fn init_with(format: LogFormat, default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .with_current_span(true)
            .with_target(false)
            .try_init(),
        LogFormat::Test => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .with_test_writer()
            .try_init(),
    };
}
