//! Process-wide logging setup shared by every host of the stock engine.

pub mod logging;

pub use logging::LogFormat;

/// Initialize JSON logging filtered by `RUST_LOG` (default `info`).
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    logging::init_with(LogFormat::Json, "info");
}

/// Human-readable logging routed through the test harness' capture.
pub fn init_for_tests() {
    logging::init_with(LogFormat::Test, "debug");
}
