//! Logging initialization and instrumentation helpers.
//!
//! Sets up a tracing-subscriber with an `EnvFilter` and a fmt layer on
//! stderr. Detached workers have no terminal, so their stderr is either a
//! log file or discarded (see [`crate::detach`]).

pub mod metrics;
pub mod work;

use crate::error::{Error, Result};

/// Translate a configured level into an `EnvFilter` directive.
///
/// Accepts the usual tracing levels plus `silent`, which turns logging off.
pub fn filter_directive(level: &str) -> String {
    match level.trim().to_ascii_lowercase().as_str() {
        "silent" | "off" | "" => "off".to_string(),
        other => other.to_string(),
    }
}

/// Initialize logging for this process.
///
/// `RUST_LOG` takes precedence over `level` when set.
///
/// # Errors
///
/// Returns an error if the level cannot be parsed or a global subscriber
/// was already installed.
pub fn init_logging(level: &str) -> Result<()> {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter_directive(level))
            .map_err(|e| Error::Config(format!("invalid log level {level:?}: {e}")))?,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        )
        .try_init()
        .map_err(|e| Error::Config(format!("failed to init tracing subscriber: {e}")))
}
