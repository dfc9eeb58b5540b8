use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "warn,mysql_via_ssh=info";

/// Initialize logging for the application.
///
/// Logs go to stderr so that stdout only carries query results.
pub fn init() {
    // Set default log level from environment or use the crate default
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    install(filter);
}

/// Initialize logging with custom level
pub fn init_with_level(level: &str) {
    let filter = EnvFilter::new(format!("warn,mysql_via_ssh={}", level));

    install(filter);
    tracing::debug!("Logging initialized with level: {}", level);
}

fn install(filter: EnvFilter) {
    // try_init: a second initialization (e.g. from tests) is not an error
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_line_number(true),
        )
        .try_init();
}
