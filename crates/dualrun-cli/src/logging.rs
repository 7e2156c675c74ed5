//! Subscriber setup for the `dualrun` binary

use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// Log line format selected with `--log-format`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum LogFormat {
    /// Compact human-readable lines
    Text,
    /// One JSON object per event
    Json,
}

/// Install the global subscriber
///
/// `RUST_LOG` wins over the default `info` level. Logs go to stderr so that
/// report output on stdout stays machine-readable.
pub(crate) fn init(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    match format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.compact().init(),
    }
}
