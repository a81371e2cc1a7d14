use axum::{Router, extract::State, http::StatusCode, routing::get};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

use crate::AppState;

/// Serves the liveness probe and the metrics endpoint. The probe fails
/// when the controller's last tick start falls too far behind wall time.
pub async fn start_probe_server(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .with_state(state);

    info!("Probe server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthz(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if state.health.alive() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "nextCheck too old")
    }
}

async fn metrics(State(state): State<AppState>) -> String {
    state.metrics.render()
}
