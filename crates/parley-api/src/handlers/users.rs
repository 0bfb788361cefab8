//! /users handlers — membership inspection and operator kicks.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use super::ApiState;

// ── /users ───────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct UsersResponse {
    pub users: Vec<UserInfo>,
}

#[derive(Serialize)]
pub struct UserInfo {
    pub username: String,
    pub transport: String,
    pub peer: String,
    pub connected_secs: u64,
    pub last_seen_secs: u64,
}

pub async fn handle_users(State(state): State<ApiState>) -> Json<UsersResponse> {
    let mut users: Vec<UserInfo> = state
        .nodes()
        .flat_map(|node| {
            let transport = node.kind().to_string();
            node.registry()
                .snapshot()
                .into_iter()
                .map(move |(username, session)| UserInfo {
                    username,
                    transport: transport.clone(),
                    peer: session.handle.addr().to_string(),
                    connected_secs: session.connected_at.elapsed().as_secs(),
                    last_seen_secs: session.last_seen.elapsed().as_secs(),
                })
        })
        .collect();
    users.sort_by(|a, b| {
        a.username
            .cmp(&b.username)
            .then_with(|| a.transport.cmp(&b.transport))
    });

    Json(UsersResponse { users })
}

// ── /users/:name (DELETE) ────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct KickResponse {
    pub username: String,
    pub removed: bool,
}

pub async fn handle_kick(
    State(state): State<ApiState>,
    Path(username): Path<String>,
) -> Result<Json<KickResponse>, (StatusCode, String)> {
    if username.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "username required".to_string()));
    }

    let mut removed = false;
    for node in state.nodes() {
        if node.kick(&username).await {
            removed = true;
        }
    }

    if removed {
        tracing::info!(user = %username, "user removed via API");
    }

    Ok(Json(KickResponse { username, removed }))
}
