use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use host::config::TelemetryOptions;
use host::{Args, HostConfig, HostError, TERMINATION_MESSAGE};

fn main() -> ExitCode {
    let args = Args::parse();
    let loaded = HostConfig::load(args.config.as_deref());

    // Log with defaults when the config itself is broken
    let telemetry = loaded
        .as_ref()
        .map(|config| config.telemetry.clone())
        .unwrap_or_else(|_| TelemetryOptions::default());
    let _log_guard = match host::logging::init(&telemetry) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{TERMINATION_MESSAGE}: {e}");
            return ExitCode::FAILURE;
        }
    };

    match try_main(loaded) {
        Ok(()) => {
            tracing::info!("Silo host exited cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = format!("{e:#}"), "{}", TERMINATION_MESSAGE);
            ExitCode::FAILURE
        }
    }
}

fn try_main(loaded: Result<HostConfig, HostError>) -> anyhow::Result<()> {
    let config = loaded.context("Failed to load configuration")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build the tokio runtime")?;

    host::block_on_guarded(&runtime, host::run(config, host::shutdown_signal()))
}
