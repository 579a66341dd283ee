//! Tracing subscriber setup for hosts and tests

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a console subscriber filtered by `RUST_LOG` plus `level`
///
/// Returns false when a global subscriber was already installed, which
/// makes repeated calls from tests harmless.
pub fn init(level: tracing::Level) -> bool {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_ansi(false))
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .is_ok()
}

/// Like [`init`], but writes through the test harness capture
pub fn init_for_tests() -> bool {
    tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()))
        .try_init()
        .is_ok()
}
