//! JSON `/status` endpoint shared by the node and the relay.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{response::Json, routing::get, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{MarketError, MarketResult};

/// Producer of the current status report.
pub type StatusFn<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// Router serving `GET /status` and `GET /health`.
pub fn status_router<T>(report: StatusFn<T>) -> Router
where
    T: Serialize + Send + 'static,
{
    Router::new()
        .route(
            "/status",
            get(move || {
                let report = report.clone();
                async move { Json(report()) }
            }),
        )
        .route("/health", get(|| async { "OK" }))
}

/// Serve `router` on `addr` until `shutdown` is cancelled.
pub async fn serve_status(
    addr: &str,
    router: Router,
    shutdown: CancellationToken,
) -> MarketResult<SocketAddr> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| MarketError::Config(format!("Cannot bind status endpoint {addr}: {e}")))?;
    let local = listener
        .local_addr()
        .map_err(|e| MarketError::Config(format!("Status endpoint has no address: {e}")))?;
    info!("Status endpoint listening on http://{}/status", local);

    tokio::spawn(async move {
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(e) = served {
            tracing::warn!("Status endpoint stopped: {}", e);
        }
    });
    Ok(local)
}
