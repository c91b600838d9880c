//! Log output for the `dfbridge` binary.
//!
//! Filter directives are read from `DFBRIDGE_LOG` first, so adapter logging
//! can be tuned without touching other tools that honour `RUST_LOG`.
//! `RUST_LOG` is the second choice; the level chosen on the command line
//! applies when neither is set or parses.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Variable holding dfbridge-specific filter directives.
pub const LOG_ENV: &str = "DFBRIDGE_LOG";

/// Filter from `DFBRIDGE_LOG`, then `RUST_LOG`, then `level`.
pub fn log_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Install the global subscriber: plain text, or one JSON object per line
/// when `json` is set. Only the first call in a process takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let filter = log_filter(level);
    let layer = fmt::layer().with_target(false);
    let installed = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init()
    } else {
        tracing_subscriber::registry().with(filter).with(layer).try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
