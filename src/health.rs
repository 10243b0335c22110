//! Liveness endpoint for hosting platforms that poll an HTTP port.

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tracing::info;

pub fn router() -> Router {
    Router::new()
        .route("/", get(ok))
        .route("/health", get(ok))
}

async fn ok() -> &'static str {
    "OK"
}

/// Bind `0.0.0.0:port`.
pub async fn bind(port: u16) -> std::io::Result<TcpListener> {
    TcpListener::bind(("0.0.0.0", port)).await
}

/// Serve the liveness routes until the process exits.
pub async fn serve(listener: TcpListener) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("💓 Health endpoint listening on {addr}");
    }
    axum::serve(listener, router()).await
}
