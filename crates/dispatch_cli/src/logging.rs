use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Logs go to stderr so stdout stays machine-readable.
///
/// `RUST_LOG` selects levels; `info` when unset.
pub fn init(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().with_current_span(false).init();
    } else {
        builder.init();
    }
}
