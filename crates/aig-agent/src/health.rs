use std::net::SocketAddr;

use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::session::ConnectionState;

pub fn router(state: watch::Receiver<ConnectionState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(state)
}

async fn health(State(state): State<watch::Receiver<ConnectionState>>) -> Json<Value> {
    let current = state.borrow().clone();
    Json(json!({
        "status": "ok",
        "role": "agent",
        "connection": current.as_str(),
        "current_task": current.current_task(),
    }))
}

pub async fn serve(port: u16, state: watch::Receiver<ConnectionState>) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}
