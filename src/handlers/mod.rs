mod health;
mod metrics;

use axum::{Router, routing::get};
use tracing::{error, info};

pub use health::health_handler;
pub use metrics::metrics_handler;

pub fn router() -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
}

// serve /health and /metrics in the background while a run executes
pub async fn spawn_metrics_server(port: u16) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Metrics available on http://localhost:{port}/metrics");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router()).await {
            error!(error = %e, "metrics server stopped");
        }
    }))
}
