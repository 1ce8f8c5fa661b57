// Tracing setup shared by every binary.
// RUST_LOG picks the filter (default `info`), LOG_FORMAT=json switches to JSON lines.

use tracing_subscriber::EnvFilter;

pub fn init(service: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_line_number(true)
            .init();
    }

    tracing::info!(service = service, version = env!("CARGO_PKG_VERSION"), "Logging initialised");
}
