//! Process-wide `tracing` subscriber for the binary.
//!
//! The library only emits events; installing a subscriber is left to
//! the program embedding it.

use tracing_subscriber::EnvFilter;

/// Install a formatting subscriber filtered by `RUST_LOG` if set, else by
/// `directives`. Calling it again is harmless.
pub fn init(directives: &str) {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => match EnvFilter::try_new(directives) {
            Ok(filter) => filter,
            Err(_) => EnvFilter::new(crate::config::DEFAULT_LOG_FILTER),
        },
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
