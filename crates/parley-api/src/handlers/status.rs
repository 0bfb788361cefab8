//! /status and /daemon/shutdown handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::ApiState;

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub total_users: usize,
    pub relays: Vec<RelayInfo>,
}

#[derive(Serialize)]
pub struct RelayInfo {
    pub transport: String,
    pub users: usize,
    pub uptime_secs: u64,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let relays: Vec<RelayInfo> = state
        .nodes()
        .map(|node| RelayInfo {
            transport: node.kind().to_string(),
            users: node.registry().len(),
            uptime_secs: node.uptime().as_secs(),
        })
        .collect();

    Json(StatusResponse {
        uptime_secs: state.started_at.elapsed().as_secs(),
        total_users: relays.iter().map(|r| r.users).sum(),
        relays,
    })
}

// ── /daemon/shutdown ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ShutdownResponse {
    pub shutting_down: bool,
}

pub async fn handle_shutdown(State(state): State<ApiState>) -> Json<ShutdownResponse> {
    tracing::info!("shutdown requested via API");
    let shutting_down = state.shutdown_tx.send(()).is_ok();
    Json(ShutdownResponse { shutting_down })
}
