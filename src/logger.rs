//! Logging setup for applications embedding the gnsolve optimizer
//!
//! The library itself only emits `tracing` events. Binaries, benches and tests
//! that want to see them call [`init_logger`] once at startup.

use tracing::Level;

/// Initialize the tracing subscriber with the default INFO level
///
/// Default log level: INFO (overrideable via RUST_LOG environment variable)
///
/// # Example
/// ```no_run
/// use gnsolve::init_logger;
///
/// init_logger();
/// tracing::info!("pipeline started");
/// ```
///
/// # Environment Variables
/// ```bash
/// RUST_LOG=gnsolve=debug cargo test   # per-iteration Gauss-Newton table
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Initialize the tracing subscriber with a custom default level
///
/// Calling it more than once is harmless; later calls leave the first
/// subscriber in place.
///
/// # Arguments
/// * `default_level` - The default log level (overrideable via RUST_LOG)
pub fn init_logger_with_level(default_level: Level) {
    use tracing_subscriber::fmt::time::SystemTime;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_timer(SystemTime)
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_initialization_is_harmless() {
        init_logger_with_level(Level::WARN);
        init_logger();
        tracing::warn!("logger initialized twice");
    }
}
