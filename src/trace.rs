//! Tracing subscriber setup.
//!
//! The crate logs through the `tracing` facade and never installs a subscriber on its own.
//! Binaries and tests that want output call [`init_tracing`], available with the `subscriber`
//! feature.

/// Installs a formatting subscriber filtered by `RUST_LOG`, defaulting to `rtloop=info`.
///
/// Returns `false` if a global subscriber was already installed, so repeated calls from tests
/// are harmless.
#[cfg(feature = "subscriber")]
pub fn init_tracing() -> bool {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rtloop=info"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_names(true)
                .with_file(false)
                .with_line_number(false)
                .with_timer(fmt::time::uptime()),
        )
        .with(filter)
        .try_init()
        .is_ok()
}

#[cfg(not(feature = "subscriber"))]
pub const fn init_tracing() -> bool {
    false
}
