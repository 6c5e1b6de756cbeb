//! Tracing bootstrap

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the tracing subscriber once, honoring `RUST_LOG` with an
/// info-level default. Logs carry structural information only.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,engram_api=info,tower_http=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}
