use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured JSON logging to stderr.
///
/// `RUST_LOG` overrides the default filter when set; otherwise `quiet`
/// selects between error-only and info-level output for this crate.
pub fn init_logging(quiet: bool) {
    let default = if quiet {
        "syncline=error"
    } else {
        "syncline=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(false)
                .with_span_list(false),
        )
        .with(filter)
        .init();
}
