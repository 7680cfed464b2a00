//! HTTP surface for operators: Prometheus scrape target and liveness check

pub mod handlers;
pub mod routes;

pub use routes::*;

use std::future::Future;
use tokio::net::TcpListener;

/// Serve the operator routes on `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Metrics endpoint listening on http://{}/metrics", addr);
    }

    axum::serve(listener, build_router())
        .with_graceful_shutdown(shutdown)
        .await
}
