//! Tracing setup shared by the binaries.

use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

/// Installs the global subscriber.
///
/// `RUST_LOG` wins when set and valid; otherwise `default_directives` is used,
/// and `error` if those do not parse either. Logs go to stderr so they never
/// interleave with the texel dump on stdout. Calling this twice is harmless.
pub fn init_tracing(default_directives: &str) {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => match EnvFilter::try_new(default_directives) {
            Ok(filter) => filter,
            Err(_) => EnvFilter::new("error"),
        },
    };

    let _ = tracing_subscriber::fmt()
        .pretty()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}
