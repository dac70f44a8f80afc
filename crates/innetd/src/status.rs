//! HTTP status endpoint — exposes hop configuration and counters as JSON.

use std::net::SocketAddr;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;

use innet_core::config::{HopMode, KernelKind};
use innet_services::{HopStats, StatsSnapshot};

#[derive(Clone)]
pub struct StatusState {
    pub hop: HopInfo,
    pub stats: HopStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct HopInfo {
    pub role: &'static str,
    pub mode: HopMode,
    pub kernel: KernelKind,
    pub max_rounds: u32,
    pub listen_addr: SocketAddr,
    pub next_hop: SocketAddr,
}

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub hop: HopInfo,
    pub stats: StatsSnapshot,
}

async fn handle_status(State(state): State<StatusState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        hop: state.hop.clone(),
        stats: state.stats.snapshot(),
    })
}

// ── Router ────────────────────────────────────────────────────────────────────

pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .with_state(state)
}

pub async fn serve(state: StatusState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!(port, "status endpoint listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
