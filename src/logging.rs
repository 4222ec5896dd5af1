//! Logging setup.

use tracing_subscriber::EnvFilter;

/// Sets up logging of events reported by the pool.
///
/// Use the RUST_LOG environment variable to override the defaults.
///
/// E.g. To enable debug level logging:
///   RUST_LOG=DEBUG
///
/// Or to only see servers being added and retired:
///   RUST_LOG=domain_pool::pool=TRACE
///
/// Calling this more than once is harmless, later calls do nothing.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_thread_ids(true)
        .without_time()
        .try_init()
        .ok();
}
