//! Logging initialisation.
//!
//! Structured logging via `tracing`. Output format and level are chosen
//! at process start:
//!
//! - `MDPIPE_LOG` / `RUST_LOG`: filter directives (default: `info`)
//! - `MDPIPE_LOG_FORMAT`: "json" for machine-readable output

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialise the global tracing subscriber.
///
/// Safe to call once per process; later calls are ignored so tests can
/// call it freely.
pub fn init() {
    let filter = EnvFilter::try_from_env("MDPIPE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("MDPIPE_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };

    let _ = tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init();
}
