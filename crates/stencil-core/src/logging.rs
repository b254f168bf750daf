//! # Logging
//!
//! Process-wide `tracing` subscriber setup. `RUST_LOG` selects the filter
//! (default `info`); `STENCIL_LOG_FORMAT=json` switches to JSON lines.

use tracing_subscriber::EnvFilter;

const LOG_FORMAT_ENV: &str = "STENCIL_LOG_FORMAT";

/// Install the global subscriber. Safe to call more than once; later calls are
/// ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let result = if json {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
