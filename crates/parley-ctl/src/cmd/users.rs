//! Membership commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, delete_json, get_json};
use super::status::format_secs;

#[derive(Deserialize)]
struct UsersResponse {
    users: Vec<UserInfo>,
}

#[derive(Deserialize)]
struct UserInfo {
    username: String,
    transport: String,
    peer: String,
    connected_secs: u64,
    last_seen_secs: u64,
}

#[derive(Deserialize)]
struct KickResponse {
    username: String,
    removed: bool,
}

pub async fn cmd_users(port: u16) -> Result<()> {
    let resp: UsersResponse = get_json(&format!("{}/users", base_url(port))).await?;

    if resp.users.is_empty() {
        println!("No users online.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Users Online ({})", resp.users.len());
    println!("═══════════════════════════════════════");

    for u in &resp.users {
        println!("  ┌─ {}", u.username);
        println!("  │  via       : {} {}", u.transport, u.peer);
        println!("  │  connected : {} ago", format_secs(u.connected_secs));
        println!("  └─ last seen : {} ago", format_secs(u.last_seen_secs));
    }

    Ok(())
}

pub async fn cmd_kick(port: u16, username: &str) -> Result<()> {
    let resp: KickResponse = delete_json(&format!("{}/users/{}", base_url(port), username)).await?;
    if resp.removed {
        println!("Removed {}.", resp.username);
    } else {
        println!("No user named {} is online.", resp.username);
    }
    Ok(())
}
