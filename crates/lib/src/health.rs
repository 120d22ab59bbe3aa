//! Optional HTTP health probe.

use crate::channels::ActiveChannels;
use axum::{extract::State, routing::get, Json, Router};
use serde_json::json;
use tokio::net::TcpListener;

pub fn router(active: ActiveChannels) -> Router {
    Router::new().route("/", get(health_http)).with_state(active)
}

/// Serve the health router on an already bound listener until the task is aborted.
pub async fn serve(listener: TcpListener, active: ActiveChannels) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("health listening on {}", addr);
    }
    axum::serve(listener, router(active)).await
}

/// GET / returns the runtime state and the currently active channels.
async fn health_http(State(active): State<ActiveChannels>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "channels": active.names().await,
    }))
}
