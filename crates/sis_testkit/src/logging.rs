//! Test logging bootstrap.

use tracing_subscriber::EnvFilter;

/// Installs a fmt subscriber writing through the test harness.
///
/// The filter comes from `RUST_LOG` (default `sis_core=debug`). Calling this
/// more than once is harmless.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sis_core=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
