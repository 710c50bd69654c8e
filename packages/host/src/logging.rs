//! Tracing subscriber setup.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::TelemetryOptions;
use crate::error::HostError;

/// Install the global subscriber, writing to stdout off the calling thread.
///
/// `RUST_LOG` takes precedence over `telemetry.log_level`. Buffered lines
/// are flushed when the returned guard is dropped.
pub fn init(options: &TelemetryOptions) -> Result<WorkerGuard, HostError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&options.log_level))
        .map_err(|e| HostError::Logging(e.to_string()))?;
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());

    let registry = tracing_subscriber::registry().with(filter);

    #[cfg(feature = "json-logs")]
    let result = if options.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(writer))
            .try_init()
    };

    #[cfg(not(feature = "json-logs"))]
    let result = {
        if options.json {
            eprintln!("telemetry.json needs the json-logs feature, logging as text");
        }
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(writer))
            .try_init()
    };

    result.map_err(|e| HostError::Logging(e.to_string()))?;
    Ok(guard)
}
