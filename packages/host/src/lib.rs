//! Process host for a silo.
//!
//! Loads configuration, installs logging, wires the configured storage and
//! runs one silo until a shutdown signal arrives or the cluster declares it
//! dead.
//!
//! # Features
//!
//! - `health` (default): serve `GET /health` on `health.address`
//! - `json-logs`: allow `telemetry.json = true`
//! - `rocksdb`: RocksDB backend for the `surrealdb` provider

pub mod bootstrap;
pub mod config;
mod error;
pub mod grains;
#[cfg(feature = "health")]
pub mod health;
pub mod humans;
pub mod logging;

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};

use anyhow::Context;

pub use config::{Args, HostConfig, StorageProvider};
pub use error::HostError;

/// Message logged when the host stops on an error.
pub const TERMINATION_MESSAGE: &str = "silo host terminated unexpectedly";

/// Start a silo from `config` and run it until `shutdown` resolves.
///
/// Returns an error if startup fails or the silo stops on its own.
pub async fn run<F>(config: HostConfig, shutdown: F) -> Result<(), HostError>
where
    F: Future<Output = ()>,
{
    let silo = bootstrap::build(&config).await?.start().await?;

    #[cfg(feature = "health")]
    let health = if config.health.enabled {
        match health::HealthServer::spawn(config.health.address, silo.monitor()).await {
            Ok(server) => Some(server),
            Err(e) => {
                silo.shutdown().await?;
                return Err(e);
            }
        }
    } else {
        None
    };

    let stopped_on_its_own = tokio::select! {
        _ = shutdown => None,
        reason = silo.terminated() => Some(reason),
    };

    #[cfg(feature = "health")]
    if let Some(server) = health {
        server.stop().await;
    }

    match stopped_on_its_own {
        None => {
            tracing::info!("Shutdown requested");
            silo.shutdown().await?;
            Ok(())
        }
        Some(reason) => {
            silo.kill().await;
            Err(reason.into())
        }
    }
}

/// Drive `run` to completion on `runtime`.
///
/// A panic that unwinds out of `run` is returned as an error like any other
/// failure, so the caller's single error handler sees it.
pub fn block_on_guarded<F>(runtime: &tokio::runtime::Runtime, run: F) -> anyhow::Result<()>
where
    F: Future<Output = Result<(), HostError>>,
{
    match panic::catch_unwind(AssertUnwindSafe(|| runtime.block_on(run))) {
        Ok(result) => result.context("Silo stopped with an error"),
        Err(payload) => Err(anyhow::anyhow!("Silo panicked: {}", panic_message(&*payload))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Resolve on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
