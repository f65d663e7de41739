use std::net::SocketAddr;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;
use tracing::info;

async fn health() -> &'static str {
    "ok"
}

pub fn router() -> Router {
    // /healthz kept for probes configured against older manifests
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .layer(TraceLayer::new_for_http())
}

pub async fn run_http_server(addr: SocketAddr) -> anyhow::Result<()> {
    info!("template operator HTTP listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(addr).await?, router()).await?;
    Ok(())
}
