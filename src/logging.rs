use crate::config::{LogFormat, LoggingConfig};
use crate::error::{EscrowError, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level. Logs go to stderr so the replay
/// command can keep stdout for its CSV output.
pub fn init_logging(config: &LoggingConfig, cli_verbose: u8) -> Result<()> {
    let level = match cli_verbose {
        0 => config.level.as_str(),
        1 => "debug",
        _ => "trace",
    };

    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) => EnvFilter::new(directives),
        Err(_) => EnvFilter::try_new(format!("escrowd={level},tower_http={level}"))
            .map_err(|e| EscrowError::ConfigError(format!("log level {level:?}: {e}")))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Pretty => {
            let show_location = matches!(level, "debug" | "trace");
            registry
                .with(
                    fmt::layer()
                        .with_target(show_location)
                        .with_line_number(show_location)
                        .with_file(show_location)
                        .with_writer(std::io::stderr),
                )
                .try_init()
        }
    };

    result.map_err(|e| EscrowError::InternalError(e.into()))
}
