//! Daemon status and shutdown commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json, post_json};

#[derive(Deserialize)]
struct StatusResponse {
    uptime_secs: u64,
    total_users: usize,
    relays: Vec<RelayInfo>,
}

#[derive(Deserialize)]
struct RelayInfo {
    transport: String,
    users: usize,
    uptime_secs: u64,
}

#[derive(Deserialize)]
struct ShutdownResponse {
    shutting_down: bool,
}

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  Parley Relay Status");
    println!("═══════════════════════════════════════");
    println!("  Uptime       : {}", format_secs(resp.uptime_secs));
    println!("  Users online : {}", resp.total_users);

    if resp.relays.is_empty() {
        println!("\n  No relays running.");
    } else {
        println!("\n  Relays:");
        for r in &resp.relays {
            println!("  ┌─ {}", r.transport);
            println!("  │  users  : {}", r.users);
            println!("  └─ uptime : {}", format_secs(r.uptime_secs));
        }
    }

    Ok(())
}

pub async fn cmd_shutdown(port: u16) -> Result<()> {
    let resp: ShutdownResponse =
        post_json(&format!("{}/daemon/shutdown", base_url(port))).await?;
    if resp.shutting_down {
        println!("parleyd is shutting down.");
    } else {
        println!("parleyd did not accept the shutdown request.");
    }
    Ok(())
}

pub(crate) fn format_secs(secs: u64) -> String {
    match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3600 => format!("{}m {}s", s / 60, s % 60),
        s => format!("{}h {}m", s / 3600, (s % 3600) / 60),
    }
}
