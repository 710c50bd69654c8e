//! `GET /health` for load balancers and orchestrators.

use std::net::SocketAddr;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use silo::{SiloMonitor, SiloStatus};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::HostError;

#[derive(Debug, Serialize)]
struct HealthResponse {
    /// The silo's membership status
    status: SiloStatus,
    silo: String,
    active_grains: usize,
    /// Seconds since the silo started
    uptime: u64,
}

/// A running health server.
pub struct HealthServer {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

impl HealthServer {
    /// Bind `address` and serve health checks for `monitor`.
    pub async fn spawn(address: SocketAddr, monitor: SiloMonitor) -> Result<Self, HostError> {
        let listener = TcpListener::bind(address).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown, stopped) = oneshot::channel::<()>();

        let app = router(monitor);
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = stopped.await;
                })
                .await
        });

        tracing::info!("Health endpoint listening on http://{}/health", local_addr);
        Ok(Self {
            local_addr,
            shutdown,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting requests and wait for in-flight ones.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        match self.task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Health server failed: {}", e),
            Err(e) => tracing::warn!("Health server task panicked: {}", e),
        }
    }
}

pub fn router(monitor: SiloMonitor) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(monitor)
}

async fn health_handler(State(monitor): State<SiloMonitor>) -> impl IntoResponse {
    let status = monitor.status();
    let stats = monitor.stats().await;
    let healthy = status.is_active() && stats.is_ok();

    let body = HealthResponse {
        status,
        silo: monitor.address().to_string(),
        active_grains: stats.map(|s| s.activations).unwrap_or_default(),
        uptime: monitor.uptime().as_secs(),
    };
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        [(header::CACHE_CONTROL, "no-store, no-cache, must-revalidate")],
        Json(body),
    )
}
