//! Boots the global `tracing` subscriber from `LOG_LEVEL`/`LOG_FORMAT`.
//! Every component logs through `tracing`'s macros with structured
//! fields (`session_id`, `job_id`, ...) rather than formatted strings, so
//! either layer here can render them.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Installs the process-wide subscriber. Must run before any other
/// component emits its first log line, including `Config::from_env`'s own
/// startup-failure path.
pub fn init(log_level: &str, log_format: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}
